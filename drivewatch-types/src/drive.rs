// SPDX-License-Identifier: GPL-3.0-only

//! Drive event models
//!
//! A drive is identified to consumers by its mount path; the display name
//! is advisory and the media family tells a sync client whether it is
//! looking at plugged-in hardware or a network share.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Media family of a notified drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveKind {
    /// Physical removable media (USB sticks, card readers, external disks)
    Physical,

    /// Network attached storage (SMB/NFS/AFP shares)
    Network,
}

/// A drive as announced to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveInfo {
    /// Absolute path at which the volume is mounted; the canonical identity
    /// of the drive for the lifetime of the mount
    pub mount_path: PathBuf,

    /// Non-empty, user-meaningful name
    pub display_name: String,

    /// Media family
    pub kind: DriveKind,
}

/// Drive lifecycle event delivered on the outbound queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveEvent {
    Added(DriveInfo),
    Removed(DriveInfo),
}

impl DriveEvent {
    /// The drive this event concerns.
    pub fn drive(&self) -> &DriveInfo {
        match self {
            DriveEvent::Added(info) | DriveEvent::Removed(info) => info,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, DriveEvent::Added(_))
    }
}

/// Synthesize a display name from the final non-empty component of a mount
/// path. Returns `None` for the filesystem root and for paths with no
/// normal components.
pub fn display_name_for_mount(path: &Path) -> Option<String> {
    path.components().rev().find_map(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            (!name.is_empty()).then(|| name.into_owned())
        }
        _ => None,
    })
}
