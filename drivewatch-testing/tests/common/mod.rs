// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use futures::StreamExt;

use drivewatch_diskarb::{DriveEventStream, RunnerConfig};
use drivewatch_types::DriveEvent;

/// Shrunk quanta so the suites observe shutdown behavior quickly.
pub fn fast_config() -> RunnerConfig {
    RunnerConfig {
        quantum: Duration::from_millis(10),
        join_ceiling: Duration::from_secs(2),
    }
}

pub async fn next_event(stream: &mut DriveEventStream) -> DriveEvent {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for a drive event")
        .expect("drive event stream closed")
}

/// Give the event loop time to misbehave, then check it did not.
pub async fn assert_quiet(stream: &mut DriveEventStream) {
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(stream.try_recv().is_none(), "expected no drive events");
}
