// SPDX-License-Identifier: GPL-3.0-only

//! Network attached storage.
//!
//! Network volumes never carry a volume name, but their mount path is
//! already known when they appear, so the display name is synthesized from
//! the final path component and no pending state is needed.

use tracing::debug;

use drivewatch_types::{DriveEvent, DriveInfo, DriveKind, display_name_for_mount};

use super::{EventSink, MediaTypeCallbacks};
use crate::host::{DescriptionKey, DiskDescription, MatchFilter};

/// Mount prefix of the host's pseudo-filesystems.
const SYSTEM_VOLUMES: &str = "/System/Volumes";

/// Filesystem kind of automounter-managed volumes.
const AUTOFS: &str = "autofs";

pub struct NetworkDriveCallbacks {
    filter: MatchFilter,
    sink: EventSink,
}

impl NetworkDriveCallbacks {
    pub fn new(sink: EventSink) -> Self {
        Self {
            filter: MatchFilter::new()
                .require(DescriptionKey::MediaWhole, true)
                .require(DescriptionKey::MediaNetwork, true),
            sink,
        }
    }

    fn emit(&self, description: &DiskDescription, added: bool) {
        let Some(path) = description.mount_path() else {
            debug!("network volume without a mount path; dropping event");
            return;
        };
        let Some(display_name) = display_name_for_mount(path) else {
            debug!(path = %path.display(), "no usable name for network volume");
            return;
        };
        let info = DriveInfo {
            mount_path: path.to_path_buf(),
            display_name,
            kind: DriveKind::Network,
        };
        self.sink.emit(if added {
            DriveEvent::Added(info)
        } else {
            DriveEvent::Removed(info)
        });
    }
}

impl MediaTypeCallbacks for NetworkDriveCallbacks {
    fn kind(&self) -> DriveKind {
        DriveKind::Network
    }

    fn match_filter(&self) -> &MatchFilter {
        &self.filter
    }

    fn should_notify(&self, description: &DiskDescription) -> bool {
        match description.mount_path() {
            // The system mounts its own pseudo-filesystems (data volumes,
            // automounter roots) under /System/Volumes; none of them are
            // user-visible shares.
            Some(path) => !path.starts_with(SYSTEM_VOLUMES),
            // An automounter volume with no path is a placeholder, not a
            // mounted share.
            None => description.volume_kind.as_deref() != Some(AUTOFS),
        }
    }

    fn disk_appeared(&self, description: &DiskDescription) {
        self.emit(description, true);
    }

    fn disk_disappeared(&self, description: &DiskDescription) {
        self.emit(description, false);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;

    fn sink() -> (EventSink, UnboundedReceiver<DriveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(tx), rx)
    }

    fn share(path: Option<&str>, kind: &str) -> DiskDescription {
        DiskDescription {
            media_whole: true,
            media_network: true,
            volume_path: path.map(PathBuf::from),
            volume_kind: Some(kind.to_string()),
            ..DiskDescription::default()
        }
    }

    #[test]
    fn share_name_comes_from_the_mount_path() {
        let (sink, mut rx) = sink();
        let callbacks = NetworkDriveCallbacks::new(sink);

        callbacks.disk_appeared(&share(Some("/Volumes/share"), "smbfs"));

        let event = rx.try_recv().expect("one event");
        assert_eq!(
            event,
            DriveEvent::Added(DriveInfo {
                mount_path: PathBuf::from("/Volumes/share"),
                display_name: "share".to_string(),
                kind: DriveKind::Network,
            })
        );
    }

    #[test]
    fn unmount_withdraws_with_the_same_identity() {
        let (sink, mut rx) = sink();
        let callbacks = NetworkDriveCallbacks::new(sink);
        let description = share(Some("/Volumes/share"), "smbfs");

        callbacks.disk_appeared(&description);
        callbacks.disk_disappeared(&description);

        let added = rx.try_recv().expect("added");
        let removed = rx.try_recv().expect("removed");
        assert!(added.is_added());
        assert!(!removed.is_added());
        assert_eq!(added.drive(), removed.drive());
    }

    #[test]
    fn system_volumes_are_rejected() {
        let (sink, _rx) = sink();
        let callbacks = NetworkDriveCallbacks::new(sink);

        assert!(!callbacks.should_notify(&share(Some("/System/Volumes/Data"), "autofs")));
        assert!(!callbacks.should_notify(&share(Some("/System/Volumes/Data"), "smbfs")));
        assert!(callbacks.should_notify(&share(Some("/Volumes/share"), "smbfs")));
    }

    #[test]
    fn autofs_outside_system_volumes_is_accepted() {
        let (sink, _rx) = sink();
        let callbacks = NetworkDriveCallbacks::new(sink);

        assert!(callbacks.should_notify(&share(Some("/Volumes/homes"), AUTOFS)));
        assert!(!callbacks.should_notify(&share(None, AUTOFS)));
    }

    #[test]
    fn pathless_appearance_is_dropped() {
        let (sink, mut rx) = sink();
        let callbacks = NetworkDriveCallbacks::new(sink);

        callbacks.disk_appeared(&share(None, "smbfs"));
        assert!(rx.try_recv().is_err());
    }
}
