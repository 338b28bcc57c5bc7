// SPDX-License-Identifier: GPL-3.0-only

//! Notifier facade and the outbound event stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::Stream;
use tokio::sync::mpsc;
use tracing::error;

use drivewatch_types::DriveEvent;

use crate::config::RunnerConfig;
use crate::host::ArbitrationHost;
use crate::media::{EventSink, MediaTypeCallbacks, NetworkDriveCallbacks, PhysicalMediaCallbacks};
use crate::session::SessionRunner;

/// Contract every platform notifier backend satisfies for the
/// cross-platform dispatcher.
pub trait DriveNotify {
    /// Begin delivering events. Idempotent; returns `false` when the
    /// backend cannot start.
    fn start(&mut self) -> bool;

    /// Stop delivering events. Idempotent; safe before `start`.
    fn stop(&mut self);
}

/// Outbound queue of drive events, drained by the consumer.
pub struct DriveEventStream {
    receiver: mpsc::UnboundedReceiver<DriveEvent>,
}

impl DriveEventStream {
    /// Non-blocking drain for synchronous consumers.
    pub fn try_recv(&mut self) -> Option<DriveEvent> {
        self.receiver.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<DriveEvent> {
        self.receiver.recv().await
    }
}

impl Stream for DriveEventStream {
    type Item = DriveEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Disk-arbitration backed implementation of [`DriveNotify`].
///
/// Owns the session runner and the two media strategies. Dropping it stops
/// the notifier, so a destroyed notifier never fires another event.
pub struct DiskArbNotifier {
    runner: SessionRunner,
    strategies: [Arc<dyn MediaTypeCallbacks>; 2],
}

impl DiskArbNotifier {
    pub fn new(host: Arc<dyn ArbitrationHost>) -> (Self, DriveEventStream) {
        Self::with_config(host, RunnerConfig::default())
    }

    pub fn with_config(
        host: Arc<dyn ArbitrationHost>,
        config: RunnerConfig,
    ) -> (Self, DriveEventStream) {
        let (tx, receiver) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let physical: Arc<dyn MediaTypeCallbacks> =
            Arc::new(PhysicalMediaCallbacks::new(sink.clone()));
        let network: Arc<dyn MediaTypeCallbacks> = Arc::new(NetworkDriveCallbacks::new(sink));
        (
            Self {
                runner: SessionRunner::new(host, config),
                strategies: [physical, network],
            },
            DriveEventStream { receiver },
        )
    }
}

impl DriveNotify for DiskArbNotifier {
    fn start(&mut self) -> bool {
        if self.runner.is_running() {
            return true;
        }
        match self.runner.start(&self.strategies) {
            Ok(()) => true,
            Err(error) => {
                error!("drive notifier failed to start: {error}");
                false
            }
        }
    }

    fn stop(&mut self) {
        self.runner.stop();
    }
}

impl Drop for DiskArbNotifier {
    fn drop(&mut self) {
        self.stop();
    }
}
