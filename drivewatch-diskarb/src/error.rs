// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

use crate::host::RegistrationError;

/// Failures surfaced while starting the notifier.
///
/// Callback-path problems are never propagated; they are logged and the
/// offending event is dropped.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("disk arbitration session could not be created")]
    SessionCreate,

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("could not spawn the event thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Result type alias for notifier operations
pub type Result<T> = std::result::Result<T, NotifyError>;
