// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for drivewatch
//!
//! This crate defines the records the notifier backends emit and consumers
//! drain. Backends normalize whatever their host facility reports into
//! these types; nothing host-specific leaks past this boundary.

pub mod drive;

pub use drive::{DriveEvent, DriveInfo, DriveKind, display_name_for_mount};
