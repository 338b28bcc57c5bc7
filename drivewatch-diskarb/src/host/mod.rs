// SPDX-License-Identifier: GPL-3.0-only

//! Seam in front of the operating system's disk-arbitration service.
//!
//! The service hands out reference-counted opaque objects and dispatches
//! per-disk callbacks on whichever thread runs its loop. Everything the
//! notifier needs from it fits the [`ArbitrationHost`] trait: session
//! creation, callback registration keyed by a match dictionary, run-loop
//! scheduling, and a bounded pump. Disk state crosses the seam as a
//! [`DiskDescription`] snapshot taken when the callback fired, so nothing
//! downstream can observe a description mutating mid-callback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[cfg(target_os = "macos")]
pub mod darwin;
pub mod scoped;

pub use scoped::{HostObject, ScopedRef, Session};

/// Opaque reference to a host-owned object. Only meaningful to the host
/// that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawRef(pub usize);

/// Proof of a live callback registration.
///
/// Consumed by `unregister_callbacks`, so a registration cannot be torn
/// down twice.
#[derive(Debug)]
pub struct CallbackToken(usize);

impl CallbackToken {
    pub fn new(value: usize) -> Self {
        Self(value)
    }

    pub fn value(&self) -> usize {
        self.0
    }
}

/// The host refused a callback registration.
#[derive(Debug, Error)]
#[error("host refused callback registration: {reason}")]
pub struct RegistrationError {
    pub reason: String,
}

/// Well-known keys of a disk description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptionKey {
    MediaWhole,
    MediaLeaf,
    MediaRemovable,
    MediaEjectable,
    MediaNetwork,
    MediaUuid,
    VolumePath,
    VolumeName,
    DeviceProtocol,
    VolumeKind,
}

impl DescriptionKey {
    pub const ALL: [DescriptionKey; 10] = [
        DescriptionKey::MediaWhole,
        DescriptionKey::MediaLeaf,
        DescriptionKey::MediaRemovable,
        DescriptionKey::MediaEjectable,
        DescriptionKey::MediaNetwork,
        DescriptionKey::MediaUuid,
        DescriptionKey::VolumePath,
        DescriptionKey::VolumeName,
        DescriptionKey::DeviceProtocol,
        DescriptionKey::VolumeKind,
    ];

    /// The literal key string used by the host's description dictionary.
    pub fn as_str(self) -> &'static str {
        match self {
            DescriptionKey::MediaWhole => "DAMediaWhole",
            DescriptionKey::MediaLeaf => "DAMediaLeaf",
            DescriptionKey::MediaRemovable => "DAMediaRemovable",
            DescriptionKey::MediaEjectable => "DAMediaEjectable",
            DescriptionKey::MediaNetwork => "DAMediaNetwork",
            DescriptionKey::MediaUuid => "DAMediaUUID",
            DescriptionKey::VolumePath => "DAVolumePath",
            DescriptionKey::VolumeName => "DAVolumeName",
            DescriptionKey::DeviceProtocol => "DADeviceProtocol",
            DescriptionKey::VolumeKind => "DAVolumeKind",
        }
    }
}

/// Snapshot of a disk's description at the moment a callback fired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskDescription {
    pub media_whole: bool,
    pub media_leaf: bool,
    pub media_removable: bool,
    pub media_ejectable: bool,
    pub media_network: bool,
    pub media_uuid: Option<Uuid>,
    pub volume_path: Option<PathBuf>,
    pub volume_name: Option<String>,
    pub device_protocol: Option<String>,
    pub volume_kind: Option<String>,
}

impl DiskDescription {
    /// Value of a boolean description key; `None` for non-boolean keys.
    pub fn boolean(&self, key: DescriptionKey) -> Option<bool> {
        match key {
            DescriptionKey::MediaWhole => Some(self.media_whole),
            DescriptionKey::MediaLeaf => Some(self.media_leaf),
            DescriptionKey::MediaRemovable => Some(self.media_removable),
            DescriptionKey::MediaEjectable => Some(self.media_ejectable),
            DescriptionKey::MediaNetwork => Some(self.media_network),
            _ => None,
        }
    }

    /// The mount path, treating an empty path the same as an absent one.
    pub fn mount_path(&self) -> Option<&Path> {
        self.volume_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

/// One clause of a match dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchRule {
    /// The boolean key must hold exactly this value.
    Is(DescriptionKey, bool),

    /// At least one of the listed key/value pairs must hold.
    AnyOf(Vec<(DescriptionKey, bool)>),
}

/// Match dictionary submitted to the host with a callback registration.
///
/// Hosts evaluate [`MatchFilter::matches`] against the description of every
/// candidate disk before dispatching any of the registration's handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchFilter {
    rules: Vec<MatchRule>,
}

impl MatchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, key: DescriptionKey, value: bool) -> Self {
        self.rules.push(MatchRule::Is(key, value));
        self
    }

    pub fn require_any(mut self, pairs: Vec<(DescriptionKey, bool)>) -> Self {
        self.rules.push(MatchRule::AnyOf(pairs));
        self
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn matches(&self, description: &DiskDescription) -> bool {
        self.rules.iter().all(|rule| match rule {
            MatchRule::Is(key, want) => description.boolean(*key) == Some(*want),
            MatchRule::AnyOf(pairs) => pairs
                .iter()
                .any(|(key, want)| description.boolean(*key) == Some(*want)),
        })
    }
}

/// Handler invoked with the description snapshot of the affected disk.
pub type DiskCallback = Box<dyn FnMut(&DiskDescription) + Send>;

/// Handler additionally told which watched keys changed.
pub type DiskChangedCallback = Box<dyn FnMut(&DiskDescription, &[DescriptionKey]) + Send>;

/// One registration: a match dictionary, an optional watched-keys array,
/// and the three disk event handlers.
pub struct DiskCallbacks {
    pub filter: MatchFilter,

    /// Keys whose changes fire `description_changed`, or `None` for all.
    pub watched_keys: Option<Vec<DescriptionKey>>,

    pub appeared: DiskCallback,
    pub disappeared: DiskCallback,
    pub description_changed: DiskChangedCallback,
}

/// The operating system's disk-arbitration facility.
///
/// Reference discipline: `create_session` follows the create rule (the
/// caller owns one reference, returned through [`ScopedRef`]); every other
/// call borrows. Handlers run on whichever thread calls
/// `run_loop_quantum` for the loop the session is scheduled on.
pub trait ArbitrationHost: Send + Sync {
    /// Create a subscription session; `None` when the facility is
    /// unavailable.
    fn create_session(&self) -> Option<RawRef>;

    /// Give back the single reference owned for `object`.
    fn release(&self, object: RawRef);

    fn register_callbacks(
        &self,
        session: RawRef,
        callbacks: DiskCallbacks,
    ) -> std::result::Result<CallbackToken, RegistrationError>;

    fn unregister_callbacks(&self, session: RawRef, token: CallbackToken);

    /// Bind `session` to the calling thread's run loop.
    fn schedule_with_run_loop(&self, session: RawRef);

    fn unschedule_from_run_loop(&self, session: RawRef);

    /// Run the calling thread's loop for at most `quantum`, dispatching due
    /// callbacks on this thread.
    fn run_loop_quantum(&self, quantum: Duration);
}
