// SPDX-License-Identifier: GPL-3.0-only

//! Test support for the drivewatch notifier.
//!
//! The suites under `tests/` drive the real facade, session runner, and
//! media strategies against the hosts in [`host`]; only the operating
//! system's arbitration facility is simulated.

pub mod disks;
pub mod host;

pub use disks::{autofs_volume, disk_image, network_share, usb_stick};
pub use host::{HangingHost, SimulatedHost};

/// Opt-in logging for the suites (`RUST_LOG=drivewatch=debug`).
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
