// SPDX-License-Identifier: GPL-3.0-only

//! Disk description constructors shared by the suites.

use std::path::PathBuf;

use uuid::Uuid;

use drivewatch_diskarb::host::DiskDescription;

/// A mountable USB stick; `path` is `None` until the volume is mounted.
pub fn usb_stick(uuid: Uuid, path: Option<&str>, name: Option<&str>) -> DiskDescription {
    DiskDescription {
        media_whole: true,
        media_leaf: true,
        media_removable: true,
        media_uuid: Some(uuid),
        volume_path: path.map(PathBuf::from),
        volume_name: name.map(str::to_owned),
        device_protocol: Some("USB".to_string()),
        volume_kind: Some("msdos".to_string()),
        ..DiskDescription::default()
    }
}

/// A disk image masquerading as removable media.
pub fn disk_image(path: &str, name: &str) -> DiskDescription {
    DiskDescription {
        device_protocol: Some("Virtual Interface".to_string()),
        ..usb_stick(Uuid::new_v4(), Some(path), Some(name))
    }
}

/// A mounted network share.
pub fn network_share(path: &str) -> DiskDescription {
    DiskDescription {
        media_whole: true,
        media_network: true,
        volume_path: Some(PathBuf::from(path)),
        volume_kind: Some("smbfs".to_string()),
        ..DiskDescription::default()
    }
}

/// An automounter-managed network volume.
pub fn autofs_volume(path: &str) -> DiskDescription {
    DiskDescription {
        volume_kind: Some("autofs".to_string()),
        ..network_share(path)
    }
}
