// SPDX-License-Identifier: GPL-3.0-only

//! Physical removable media: USB sticks, card readers, external drives.
//!
//! Appearance is two-phase. Media already mounted when the session starts
//! carries a volume path in its first description and can be announced on
//! the spot. Media plugged in afterwards appears before the volume is
//! mounted; such disks are parked in a pending set keyed by media UUID and
//! announced only when a description change delivers the path.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use drivewatch_types::{DriveEvent, DriveInfo, DriveKind, display_name_for_mount};

use super::{EventSink, MediaTypeCallbacks};
use crate::host::{DescriptionKey, DiskDescription, MatchFilter};

/// Protocol reported by disk images and other synthesized devices that
/// would otherwise pass the removable-media filter.
const VIRTUAL_INTERFACE: &str = "Virtual Interface";

pub struct PhysicalMediaCallbacks {
    filter: MatchFilter,
    watched: [DescriptionKey; 1],
    sink: EventSink,

    /// Disks that appeared without a volume path and have not been
    /// announced. Entries leave either when a description change delivers
    /// a path (announce) or when the disk disappears (silence). Touched
    /// only from the event-loop thread, so the lock is never contended.
    pending_path: Mutex<BTreeSet<Uuid>>,
}

impl PhysicalMediaCallbacks {
    pub fn new(sink: EventSink) -> Self {
        Self {
            filter: MatchFilter::new()
                .require(DescriptionKey::MediaWhole, true)
                .require(DescriptionKey::MediaLeaf, true)
                .require_any(vec![
                    (DescriptionKey::MediaRemovable, true),
                    (DescriptionKey::MediaEjectable, true),
                ]),
            watched: [DescriptionKey::VolumePath],
            sink,
            pending_path: Mutex::new(BTreeSet::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, BTreeSet<Uuid>> {
        self.pending_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn drive_info(description: &DiskDescription, path: &Path) -> Option<DriveInfo> {
        let display_name = description
            .volume_name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| display_name_for_mount(path))?;
        Some(DriveInfo {
            mount_path: path.to_path_buf(),
            display_name,
            kind: DriveKind::Physical,
        })
    }
}

impl MediaTypeCallbacks for PhysicalMediaCallbacks {
    fn kind(&self) -> DriveKind {
        DriveKind::Physical
    }

    fn match_filter(&self) -> &MatchFilter {
        &self.filter
    }

    fn watched_keys(&self) -> Option<&[DescriptionKey]> {
        Some(&self.watched)
    }

    fn should_notify(&self, description: &DiskDescription) -> bool {
        description.device_protocol.as_deref() != Some(VIRTUAL_INTERFACE)
    }

    fn disk_appeared(&self, description: &DiskDescription) {
        if let Some(path) = description.mount_path() {
            // A reappearance supersedes whatever state the disk was in.
            if let Some(uuid) = description.media_uuid {
                self.pending().remove(&uuid);
            }
            if let Some(info) = Self::drive_info(description, path) {
                self.sink.emit(DriveEvent::Added(info));
            }
            return;
        }

        let Some(uuid) = description.media_uuid else {
            debug!("pathless disk appeared without a media UUID; ignoring");
            return;
        };
        debug!(%uuid, "disk appeared without a volume path; deferring announcement");
        self.pending().insert(uuid);
    }

    fn disk_disappeared(&self, description: &DiskDescription) {
        if let Some(uuid) = description.media_uuid
            && self.pending().remove(&uuid)
        {
            // Never announced, so nothing to withdraw.
            debug!(%uuid, "pending disk disappeared before mounting");
            return;
        }

        let Some(path) = description.mount_path() else {
            debug!("disk disappeared without a volume path; nothing to withdraw");
            return;
        };
        if let Some(info) = Self::drive_info(description, path) {
            self.sink.emit(DriveEvent::Removed(info));
        }
    }

    fn disk_description_changed(
        &self,
        description: &DiskDescription,
        changed_keys: &[DescriptionKey],
    ) {
        // Only the volume path is interesting, whatever else changed with it.
        if !changed_keys.contains(&DescriptionKey::VolumePath) {
            return;
        }
        let Some(uuid) = description.media_uuid else {
            return;
        };
        let Some(path) = description.mount_path() else {
            // The path went away again; keep waiting.
            return;
        };
        if !self.pending().remove(&uuid) {
            // Re-mount of an already announced disk; the consumer tracks
            // those by mount path.
            return;
        }
        if let Some(info) = Self::drive_info(description, path) {
            self.sink.emit(DriveEvent::Added(info));
        }
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

    fn usb(uuid: Option<Uuid>, path: Option<&str>, name: Option<&str>) -> DiskDescription {
        DiskDescription {
            media_whole: true,
            media_leaf: true,
            media_removable: true,
            media_uuid: uuid,
            volume_path: path.map(PathBuf::from),
            volume_name: name.map(str::to_owned),
            device_protocol: Some("USB".to_string()),
            ..DiskDescription::default()
        }
    }

    #[test]
    fn mounted_disk_is_announced_immediately() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);

        callbacks.disk_appeared(&usb(None, Some("/Volumes/USB1"), Some("USB1")));

        let event = rx.try_recv().expect("one event");
        assert_eq!(
            event,
            DriveEvent::Added(DriveInfo {
                mount_path: PathBuf::from("/Volumes/USB1"),
                display_name: "USB1".to_string(),
                kind: DriveKind::Physical,
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pathless_disk_is_deferred_until_the_path_changes_in() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);
        let uuid = Uuid::new_v4();

        callbacks.disk_appeared(&usb(Some(uuid), None, None));
        assert!(rx.try_recv().is_err());

        callbacks.disk_description_changed(
            &usb(Some(uuid), Some("/Volumes/Photos"), Some("Photos")),
            &[DescriptionKey::VolumePath],
        );

        let event = rx.try_recv().expect("one event");
        assert_eq!(event.drive().display_name, "Photos");
        assert!(event.is_added());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn second_path_change_does_not_reannounce() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);
        let uuid = Uuid::new_v4();

        callbacks.disk_appeared(&usb(Some(uuid), None, None));
        let mounted = usb(Some(uuid), Some("/Volumes/Photos"), Some("Photos"));
        callbacks.disk_description_changed(&mounted, &[DescriptionKey::VolumePath]);
        callbacks.disk_description_changed(&mounted, &[DescriptionKey::VolumePath]);

        assert!(rx.try_recv().expect("first announcement").is_added());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn path_change_for_unknown_disk_is_ignored() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);

        callbacks.disk_description_changed(
            &usb(Some(Uuid::new_v4()), Some("/Volumes/X"), None),
            &[DescriptionKey::VolumePath],
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn changes_to_other_keys_are_ignored() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);
        let uuid = Uuid::new_v4();

        callbacks.disk_appeared(&usb(Some(uuid), None, None));
        callbacks.disk_description_changed(
            &usb(Some(uuid), Some("/Volumes/X"), Some("X")),
            &[DescriptionKey::VolumeName],
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pending_disk_disappears_in_silence() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);
        let uuid = Uuid::new_v4();

        callbacks.disk_appeared(&usb(Some(uuid), None, None));
        callbacks.disk_disappeared(&usb(Some(uuid), None, None));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn announced_disk_is_withdrawn_on_disappearance() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);
        let description = usb(Some(Uuid::new_v4()), Some("/Volumes/USB1"), Some("USB1"));

        callbacks.disk_appeared(&description);
        callbacks.disk_disappeared(&description);

        assert!(rx.try_recv().expect("added").is_added());
        let removed = rx.try_recv().expect("removed");
        assert!(!removed.is_added());
        assert_eq!(removed.drive().mount_path, PathBuf::from("/Volumes/USB1"));
        assert_eq!(removed.drive().display_name, "USB1");
    }

    #[test]
    fn reappearance_with_a_path_clears_the_pending_entry() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);
        let uuid = Uuid::new_v4();

        callbacks.disk_appeared(&usb(Some(uuid), None, None));
        callbacks.disk_appeared(&usb(Some(uuid), Some("/Volumes/USB1"), Some("USB1")));
        assert!(rx.try_recv().expect("announced").is_added());

        // No longer pending: a later path change must not announce again.
        callbacks.disk_description_changed(
            &usb(Some(uuid), Some("/Volumes/USB1"), Some("USB1")),
            &[DescriptionKey::VolumePath],
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn name_falls_back_to_the_path_component() {
        let (sink, mut rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);

        callbacks.disk_appeared(&usb(None, Some("/Volumes/NO NAME"), None));
        assert_eq!(
            rx.try_recv().expect("event").drive().display_name,
            "NO NAME"
        );
    }

    #[test]
    fn virtual_interfaces_are_filtered_out() {
        let (sink, _rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);

        let image = DiskDescription {
            device_protocol: Some(VIRTUAL_INTERFACE.to_string()),
            ..usb(None, Some("/Volumes/Image"), Some("Image"))
        };
        assert!(!callbacks.should_notify(&image));
        assert!(callbacks.should_notify(&usb(None, Some("/Volumes/USB1"), None)));
    }

    #[test]
    fn match_filter_accepts_ejectable_only_media() {
        let (sink, _rx) = sink();
        let callbacks = PhysicalMediaCallbacks::new(sink);

        let ejectable = DiskDescription {
            media_removable: false,
            media_ejectable: true,
            ..usb(None, None, None)
        };
        assert!(callbacks.match_filter().matches(&ejectable));

        let fixed = DiskDescription {
            media_removable: false,
            ..usb(None, None, None)
        };
        assert!(!callbacks.match_filter().matches(&fixed));
    }
}
