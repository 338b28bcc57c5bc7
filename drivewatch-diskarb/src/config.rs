// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

/// Tuning for the session runner's event-loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// How long one run-loop pump may block between stop-flag polls. Bounds
    /// stop latency from above without busy-waiting.
    pub quantum: Duration,

    /// How long `stop` waits for the event thread to come back before
    /// detaching it and leaking the session.
    pub join_ceiling: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            quantum: Duration::from_millis(100),
            join_ceiling: Duration::from_secs(5),
        }
    }
}
