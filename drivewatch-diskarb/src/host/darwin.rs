// SPDX-License-Identifier: GPL-3.0-only

//! Real DiskArbitration binding.
//!
//! Each registration boxes its handlers behind the framework's opaque
//! context pointer; the C trampolines copy the disk's description once,
//! re-evaluate the match filter (a CoreFoundation match dictionary cannot
//! express the any-of clauses), and forward the snapshot. The context box
//! is reclaimed at unregistration, after which the framework no longer
//! holds the pointer.

use std::ffi::c_void;
use std::path::PathBuf;
use std::time::Duration;

use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFRelease, CFType, CFTypeRef, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::runloop::CFRunLoop;
use core_foundation::string::{CFString, CFStringRef};
use core_foundation::url::CFURL;
use uuid::Uuid;

use super::{
    ArbitrationHost, CallbackToken, DescriptionKey, DiskCallbacks, DiskDescription, MatchFilter,
    MatchRule, RawRef, RegistrationError,
};

/// Private run-loop mode the session is pumped in, keeping disk events out
/// of the default mode of whatever thread hosts the loop.
const RUN_LOOP_MODE: &str = "drivewatch.diskarb";

type DASessionRef = *mut c_void;
type DADiskRef = *const c_void;
type DADiskCallback = extern "C" fn(disk: DADiskRef, context: *mut c_void);
type DADiskDescriptionChangedCallback =
    extern "C" fn(disk: DADiskRef, keys: CFArrayRef, context: *mut c_void);

#[repr(C)]
#[derive(Clone, Copy)]
struct CFUUIDBytes {
    bytes: [u8; 16],
}

#[link(name = "DiskArbitration", kind = "framework")]
unsafe extern "C" {
    fn DASessionCreate(allocator: *const c_void) -> DASessionRef;
    fn DASessionScheduleWithRunLoop(
        session: DASessionRef,
        run_loop: core_foundation::runloop::CFRunLoopRef,
        mode: CFStringRef,
    );
    fn DASessionUnscheduleFromRunLoop(
        session: DASessionRef,
        run_loop: core_foundation::runloop::CFRunLoopRef,
        mode: CFStringRef,
    );
    fn DARegisterDiskAppearedCallback(
        session: DASessionRef,
        match_dict: CFDictionaryRef,
        callback: DADiskCallback,
        context: *mut c_void,
    );
    fn DARegisterDiskDisappearedCallback(
        session: DASessionRef,
        match_dict: CFDictionaryRef,
        callback: DADiskCallback,
        context: *mut c_void,
    );
    fn DARegisterDiskDescriptionChangedCallback(
        session: DASessionRef,
        match_dict: CFDictionaryRef,
        watch: CFArrayRef,
        callback: DADiskDescriptionChangedCallback,
        context: *mut c_void,
    );
    fn DAUnregisterCallback(session: DASessionRef, callback: *mut c_void, context: *mut c_void);
    fn DADiskCopyDescription(disk: DADiskRef) -> CFDictionaryRef;

    static kDADiskDescriptionMediaWholeKey: CFStringRef;
    static kDADiskDescriptionMediaLeafKey: CFStringRef;
    static kDADiskDescriptionMediaRemovableKey: CFStringRef;
    static kDADiskDescriptionMediaEjectableKey: CFStringRef;
    static kDADiskDescriptionMediaNetworkKey: CFStringRef;
    static kDADiskDescriptionMediaUUIDKey: CFStringRef;
    static kDADiskDescriptionVolumePathKey: CFStringRef;
    static kDADiskDescriptionVolumeNameKey: CFStringRef;
    static kDADiskDescriptionVolumeKindKey: CFStringRef;
    static kDADiskDescriptionDeviceProtocolKey: CFStringRef;
}

#[link(name = "CoreFoundation", kind = "framework")]
unsafe extern "C" {
    fn CFUUIDGetUUIDBytes(uuid: CFTypeRef) -> CFUUIDBytes;
}

fn cf_key(key: DescriptionKey) -> CFStringRef {
    unsafe {
        match key {
            DescriptionKey::MediaWhole => kDADiskDescriptionMediaWholeKey,
            DescriptionKey::MediaLeaf => kDADiskDescriptionMediaLeafKey,
            DescriptionKey::MediaRemovable => kDADiskDescriptionMediaRemovableKey,
            DescriptionKey::MediaEjectable => kDADiskDescriptionMediaEjectableKey,
            DescriptionKey::MediaNetwork => kDADiskDescriptionMediaNetworkKey,
            DescriptionKey::MediaUuid => kDADiskDescriptionMediaUUIDKey,
            DescriptionKey::VolumePath => kDADiskDescriptionVolumePathKey,
            DescriptionKey::VolumeName => kDADiskDescriptionVolumeNameKey,
            DescriptionKey::VolumeKind => kDADiskDescriptionVolumeKindKey,
            DescriptionKey::DeviceProtocol => kDADiskDescriptionDeviceProtocolKey,
        }
    }
}

struct CallbackContext {
    callbacks: DiskCallbacks,
}

extern "C" fn disk_appeared_trampoline(disk: DADiskRef, context: *mut c_void) {
    let ctx = unsafe { &mut *context.cast::<CallbackContext>() };
    let Some(description) = copy_description(disk) else {
        return;
    };
    if !ctx.callbacks.filter.matches(&description) {
        return;
    }
    (ctx.callbacks.appeared)(&description);
}

extern "C" fn disk_disappeared_trampoline(disk: DADiskRef, context: *mut c_void) {
    let ctx = unsafe { &mut *context.cast::<CallbackContext>() };
    let Some(description) = copy_description(disk) else {
        return;
    };
    if !ctx.callbacks.filter.matches(&description) {
        return;
    }
    (ctx.callbacks.disappeared)(&description);
}

extern "C" fn description_changed_trampoline(
    disk: DADiskRef,
    keys: CFArrayRef,
    context: *mut c_void,
) {
    let ctx = unsafe { &mut *context.cast::<CallbackContext>() };
    let Some(description) = copy_description(disk) else {
        return;
    };
    if !ctx.callbacks.filter.matches(&description) {
        return;
    }
    let changed = changed_keys(keys);
    (ctx.callbacks.description_changed)(&description, &changed);
}

/// DiskArbitration-backed host.
#[derive(Debug, Default)]
pub struct DarwinHost;

impl DarwinHost {
    pub fn new() -> Self {
        Self
    }
}

impl ArbitrationHost for DarwinHost {
    fn create_session(&self) -> Option<RawRef> {
        let session = unsafe { DASessionCreate(std::ptr::null()) };
        (!session.is_null()).then(|| RawRef(session as usize))
    }

    fn release(&self, object: RawRef) {
        unsafe { CFRelease(object.0 as CFTypeRef) };
    }

    fn register_callbacks(
        &self,
        session: RawRef,
        callbacks: DiskCallbacks,
    ) -> Result<CallbackToken, RegistrationError> {
        let match_dict = build_match_dict(&callbacks.filter);
        let watch = callbacks.watched_keys.as_deref().map(build_key_array);
        let context = Box::into_raw(Box::new(CallbackContext { callbacks }));

        unsafe {
            let session = session.0 as DASessionRef;
            DARegisterDiskAppearedCallback(
                session,
                match_dict.as_concrete_TypeRef(),
                disk_appeared_trampoline,
                context.cast(),
            );
            DARegisterDiskDisappearedCallback(
                session,
                match_dict.as_concrete_TypeRef(),
                disk_disappeared_trampoline,
                context.cast(),
            );
            DARegisterDiskDescriptionChangedCallback(
                session,
                match_dict.as_concrete_TypeRef(),
                watch
                    .as_ref()
                    .map_or(std::ptr::null(), |array| array.as_concrete_TypeRef()),
                description_changed_trampoline,
                context.cast(),
            );
        }

        Ok(CallbackToken::new(context as usize))
    }

    fn unregister_callbacks(&self, session: RawRef, token: CallbackToken) {
        let context = token.value() as *mut CallbackContext;
        let appeared: DADiskCallback = disk_appeared_trampoline;
        let disappeared: DADiskCallback = disk_disappeared_trampoline;
        let changed: DADiskDescriptionChangedCallback = description_changed_trampoline;
        unsafe {
            let session = session.0 as DASessionRef;
            DAUnregisterCallback(session, appeared as usize as *mut c_void, context.cast());
            DAUnregisterCallback(session, disappeared as usize as *mut c_void, context.cast());
            DAUnregisterCallback(session, changed as usize as *mut c_void, context.cast());
            drop(Box::from_raw(context));
        }
    }

    fn schedule_with_run_loop(&self, session: RawRef) {
        let mode = CFString::new(RUN_LOOP_MODE);
        unsafe {
            DASessionScheduleWithRunLoop(
                session.0 as DASessionRef,
                CFRunLoop::get_current().as_concrete_TypeRef(),
                mode.as_concrete_TypeRef(),
            );
        }
    }

    fn unschedule_from_run_loop(&self, session: RawRef) {
        let mode = CFString::new(RUN_LOOP_MODE);
        unsafe {
            DASessionUnscheduleFromRunLoop(
                session.0 as DASessionRef,
                CFRunLoop::get_current().as_concrete_TypeRef(),
                mode.as_concrete_TypeRef(),
            );
        }
    }

    fn run_loop_quantum(&self, quantum: Duration) {
        let mode = CFString::new(RUN_LOOP_MODE);
        CFRunLoop::run_in_mode(mode.as_concrete_TypeRef(), quantum, false);
    }
}

fn build_match_dict(filter: &MatchFilter) -> CFDictionary<CFType, CFType> {
    let mut pairs = Vec::new();
    for rule in filter.rules() {
        // Any-of clauses stay out of the dictionary and are evaluated by
        // the trampolines against the copied description.
        if let MatchRule::Is(key, value) = rule {
            let key = unsafe { CFString::wrap_under_get_rule(cf_key(*key)) };
            let value = if *value {
                CFBoolean::true_value()
            } else {
                CFBoolean::false_value()
            };
            pairs.push((key.as_CFType(), value.as_CFType()));
        }
    }
    CFDictionary::from_CFType_pairs(&pairs)
}

fn build_key_array(keys: &[DescriptionKey]) -> CFArray<CFString> {
    let strings: Vec<CFString> = keys
        .iter()
        .map(|key| unsafe { CFString::wrap_under_get_rule(cf_key(*key)) })
        .collect();
    CFArray::from_CFTypes(&strings)
}

fn changed_keys(raw: CFArrayRef) -> Vec<DescriptionKey> {
    if raw.is_null() {
        return Vec::new();
    }
    let array: CFArray<CFString> = unsafe { CFArray::wrap_under_get_rule(raw) };
    array
        .iter()
        .filter_map(|name| {
            let name = name.to_string();
            DescriptionKey::ALL
                .into_iter()
                .find(|key| key.as_str() == name)
        })
        .collect()
}

fn copy_description(disk: DADiskRef) -> Option<DiskDescription> {
    let raw = unsafe { DADiskCopyDescription(disk) };
    if raw.is_null() {
        return None;
    }
    let dict: CFDictionary = unsafe { CFDictionary::wrap_under_create_rule(raw) };
    Some(DiskDescription {
        media_whole: dict_bool(&dict, DescriptionKey::MediaWhole),
        media_leaf: dict_bool(&dict, DescriptionKey::MediaLeaf),
        media_removable: dict_bool(&dict, DescriptionKey::MediaRemovable),
        media_ejectable: dict_bool(&dict, DescriptionKey::MediaEjectable),
        media_network: dict_bool(&dict, DescriptionKey::MediaNetwork),
        media_uuid: dict_uuid(&dict, DescriptionKey::MediaUuid),
        volume_path: dict_path(&dict, DescriptionKey::VolumePath),
        volume_name: dict_string(&dict, DescriptionKey::VolumeName),
        device_protocol: dict_string(&dict, DescriptionKey::DeviceProtocol),
        volume_kind: dict_string(&dict, DescriptionKey::VolumeKind),
    })
}

fn dict_value(dict: &CFDictionary, key: DescriptionKey) -> Option<CFType> {
    dict.find(cf_key(key) as *const c_void)
        .map(|value| unsafe { CFType::wrap_under_get_rule(*value as CFTypeRef) })
}

fn dict_bool(dict: &CFDictionary, key: DescriptionKey) -> bool {
    dict_value(dict, key)
        .and_then(|value| value.downcast::<CFBoolean>())
        .map(bool::from)
        .unwrap_or(false)
}

fn dict_string(dict: &CFDictionary, key: DescriptionKey) -> Option<String> {
    dict_value(dict, key)
        .and_then(|value| value.downcast::<CFString>())
        .map(|value| value.to_string())
}

fn dict_path(dict: &CFDictionary, key: DescriptionKey) -> Option<PathBuf> {
    dict_value(dict, key)
        .and_then(|value| value.downcast::<CFURL>())
        .and_then(|url| url.to_path())
}

fn dict_uuid(dict: &CFDictionary, key: DescriptionKey) -> Option<Uuid> {
    let value = dict.find(cf_key(key) as *const c_void)?;
    let bytes = unsafe { CFUUIDGetUUIDBytes(*value as CFTypeRef) };
    Some(Uuid::from_bytes(bytes.bytes))
}
