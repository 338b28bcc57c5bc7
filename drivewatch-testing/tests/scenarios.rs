// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end runs of the notifier against scripted disk activity.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use common::{assert_quiet, fast_config, next_event};
use drivewatch_diskarb::host::{ArbitrationHost, DescriptionKey};
use drivewatch_diskarb::{DiskArbNotifier, DriveEventStream, DriveNotify};
use drivewatch_testing::{
    SimulatedHost, autofs_volume, disk_image, init_tracing, network_share, usb_stick,
};
use drivewatch_types::{DriveEvent, DriveInfo, DriveKind};

fn started(host: &Arc<SimulatedHost>) -> (DiskArbNotifier, DriveEventStream) {
    init_tracing();
    let (mut notifier, stream) = DiskArbNotifier::with_config(
        Arc::clone(host) as Arc<dyn ArbitrationHost>,
        fast_config(),
    );
    assert!(notifier.start());
    (notifier, stream)
}

#[tokio::test]
async fn preexisting_usb_stick_is_announced_after_start() {
    let host = SimulatedHost::new();
    host.insert_disk(
        "u1",
        usb_stick(Uuid::new_v4(), Some("/Volumes/USB1"), Some("USB1")),
    );

    let (mut notifier, mut stream) = started(&host);

    assert_eq!(
        next_event(&mut stream).await,
        DriveEvent::Added(DriveInfo {
            mount_path: PathBuf::from("/Volumes/USB1"),
            display_name: "USB1".to_string(),
            kind: DriveKind::Physical,
        })
    );
    assert_quiet(&mut stream).await;
    notifier.stop();
}

#[tokio::test]
async fn hot_plugged_usb_stick_waits_for_its_mount_point() {
    let host = SimulatedHost::new();
    let (mut notifier, mut stream) = started(&host);
    let uuid = Uuid::new_v4();

    host.attach_disk("u2", usb_stick(uuid, None, None));
    assert_quiet(&mut stream).await;

    host.change_description(
        "u2",
        usb_stick(uuid, Some("/Volumes/Photos"), Some("Photos")),
        &[DescriptionKey::VolumePath],
    );

    let event = next_event(&mut stream).await;
    assert_eq!(
        event,
        DriveEvent::Added(DriveInfo {
            mount_path: PathBuf::from("/Volumes/Photos"),
            display_name: "Photos".to_string(),
            kind: DriveKind::Physical,
        })
    );
    assert_quiet(&mut stream).await;
    notifier.stop();
}

#[tokio::test]
async fn disk_ejected_before_mounting_stays_silent() {
    let host = SimulatedHost::new();
    let (mut notifier, mut stream) = started(&host);

    host.attach_disk("u3", usb_stick(Uuid::new_v4(), None, None));
    host.detach_disk("u3");

    assert_quiet(&mut stream).await;
    notifier.stop();
}

#[tokio::test]
async fn virtual_interfaces_are_never_announced() {
    let host = SimulatedHost::new();
    let (mut notifier, mut stream) = started(&host);

    host.attach_disk("u4", disk_image("/Volumes/Image", "Image"));

    assert_quiet(&mut stream).await;
    notifier.stop();
}

#[tokio::test]
async fn network_share_mount_and_unmount_round_trip() {
    let host = SimulatedHost::new();
    let (mut notifier, mut stream) = started(&host);

    host.attach_disk("n1", network_share("/Volumes/share"));
    let added = next_event(&mut stream).await;
    assert_eq!(
        added,
        DriveEvent::Added(DriveInfo {
            mount_path: PathBuf::from("/Volumes/share"),
            display_name: "share".to_string(),
            kind: DriveKind::Network,
        })
    );

    host.detach_disk("n1");
    let removed = next_event(&mut stream).await;
    assert_eq!(removed, DriveEvent::Removed(added.drive().clone()));

    notifier.stop();
}

#[tokio::test]
async fn autofs_system_volume_is_ignored() {
    let host = SimulatedHost::new();
    let (mut notifier, mut stream) = started(&host);

    host.attach_disk("n2", autofs_volume("/System/Volumes/Data"));

    assert_quiet(&mut stream).await;
    notifier.stop();
}

#[tokio::test]
async fn autofs_user_share_is_announced() {
    let host = SimulatedHost::new();
    let (mut notifier, mut stream) = started(&host);

    host.attach_disk("n3", autofs_volume("/Volumes/homes"));

    let event = next_event(&mut stream).await;
    assert!(event.is_added());
    assert_eq!(event.drive().display_name, "homes");
    assert_eq!(event.drive().kind, DriveKind::Network);

    notifier.stop();
}
