// SPDX-License-Identifier: GPL-3.0-only

//! Removable-drive event notification over the host's disk-arbitration
//! facility.
//!
//! The backend subscribes to disk appeared/disappeared/description-changed
//! callbacks, filters them down to the media a sync client cares about
//! (physical removable drives and network shares), and pushes normalized
//! [`DriveEvent`](drivewatch_types::DriveEvent) records onto an outbound
//! stream.
//!
//! ## Architecture
//!
//! - [`host`] — the seam in front of the operating system's
//!   disk-arbitration service, plus the scoped ownership of its
//!   reference-counted objects. The real macOS binding lives behind
//!   `cfg(target_os = "macos")`; tests run against a simulated host.
//! - [`media`] — per-media-family callback strategies. Physical media has a
//!   two-phase appearance (the mount point is often unknown when a disk
//!   first shows up); network shares always arrive mounted.
//! - `session` — owns the subscription session and the dedicated
//!   event-loop thread that pumps it.
//! - [`notify`] — the `start`/`stop` facade handed to the cross-platform
//!   dispatcher, paired with the event stream consumers drain.

pub mod config;
pub mod error;
pub mod host;
pub mod media;
pub mod notify;
mod session;

// Re-export the domain models (canonical drive records)
pub use drivewatch_types;

pub use config::RunnerConfig;
pub use error::{NotifyError, Result};
#[cfg(target_os = "macos")]
pub use host::darwin::DarwinHost;
pub use media::{MediaTypeCallbacks, NetworkDriveCallbacks, PhysicalMediaCallbacks};
pub use notify::{DiskArbNotifier, DriveEventStream, DriveNotify};
