// SPDX-License-Identifier: GPL-3.0-only

//! Per-media-family filtering and handling of disk callbacks.
//!
//! Each family registers its own match dictionary and handler triple
//! against the session. The glue in [`register_callbacks`] applies the
//! family's post-match predicate before forwarding, so handler bodies only
//! ever see disks they are willing to announce.

pub mod network;
pub mod physical;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use drivewatch_types::{DriveEvent, DriveKind};

use crate::host::{
    ArbitrationHost, CallbackToken, DescriptionKey, DiskCallbacks, DiskDescription, MatchFilter,
    RawRef, RegistrationError,
};

pub use network::NetworkDriveCallbacks;
pub use physical::PhysicalMediaCallbacks;

/// Media-type specific classification and disk event handling.
///
/// Handlers run only on the event-loop thread; implementations keep their
/// state behind interior mutability and must not block.
pub trait MediaTypeCallbacks: Send + Sync {
    /// Media family announced by this strategy.
    fn kind(&self) -> DriveKind;

    /// Match dictionary submitted to the host with the registration.
    fn match_filter(&self) -> &MatchFilter;

    /// Description keys to monitor for changes, or `None` for all keys.
    fn watched_keys(&self) -> Option<&[DescriptionKey]> {
        None
    }

    /// Post-match predicate applied after the host's match dictionary.
    fn should_notify(&self, _description: &DiskDescription) -> bool {
        true
    }

    fn disk_appeared(&self, description: &DiskDescription);

    fn disk_disappeared(&self, description: &DiskDescription);

    /// Description changes are not interesting to most media types.
    fn disk_description_changed(
        &self,
        _description: &DiskDescription,
        _changed_keys: &[DescriptionKey],
    ) {
    }
}

/// Register `strategy` against `session`.
///
/// Builds the three host-level handlers once; each applies
/// `should_notify` and forwards to the typed handler. The `Arc` clone held
/// by every handler keeps the strategy alive for as long as the host may
/// still dispatch to it.
pub(crate) fn register_callbacks(
    host: &Arc<dyn ArbitrationHost>,
    session: RawRef,
    strategy: &Arc<dyn MediaTypeCallbacks>,
) -> Result<CallbackToken, RegistrationError> {
    debug!(kind = ?strategy.kind(), "registering media callbacks");

    let appeared = {
        let strategy = Arc::clone(strategy);
        Box::new(move |description: &DiskDescription| {
            if strategy.should_notify(description) {
                strategy.disk_appeared(description);
            }
        })
    };

    let disappeared = {
        let strategy = Arc::clone(strategy);
        Box::new(move |description: &DiskDescription| {
            if strategy.should_notify(description) {
                strategy.disk_disappeared(description);
            }
        })
    };

    let description_changed = {
        let strategy = Arc::clone(strategy);
        Box::new(
            move |description: &DiskDescription, changed_keys: &[DescriptionKey]| {
                if strategy.should_notify(description) {
                    strategy.disk_description_changed(description, changed_keys);
                }
            },
        )
    };

    host.register_callbacks(
        session,
        DiskCallbacks {
            filter: strategy.match_filter().clone(),
            watched_keys: strategy.watched_keys().map(<[DescriptionKey]>::to_vec),
            appeared,
            disappeared,
            description_changed,
        },
    )
}

/// Sender half of the outbound drive-event queue.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DriveEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<DriveEvent>) -> Self {
        Self { tx }
    }

    /// Push one record. A consumer that went away downgrades to a
    /// diagnostic; the event loop keeps running.
    pub fn emit(&self, event: DriveEvent) {
        if self.tx.send(event).is_err() {
            debug!("drive event receiver dropped; discarding event");
        }
    }
}
