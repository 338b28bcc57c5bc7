// SPDX-License-Identifier: GPL-3.0-only

//! Scoped ownership of host reference-counted objects.
//!
//! The arbitration facility mixes calls that transfer a reference to the
//! caller (create/copy) with calls that do not (get). Only the former may
//! be wrapped here; raw handles from get-calls are passed around bare.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{ArbitrationHost, RawRef};

/// Marker for a kind of host object a [`ScopedRef`] may own.
pub trait HostObject {
    const NAME: &'static str;
}

/// A disk-arbitration subscription session.
pub enum Session {}

impl HostObject for Session {
    const NAME: &'static str = "session";
}

/// Owns exactly one host reference and gives it back on drop.
///
/// Move-only; the raw handle is never aliased into a second owner.
pub struct ScopedRef<T: HostObject> {
    host: Arc<dyn ArbitrationHost>,
    raw: RawRef,
    _kind: PhantomData<T>,
}

impl<T: HostObject> ScopedRef<T> {
    /// Take ownership of the reference returned by a host create/copy call.
    pub fn new(host: Arc<dyn ArbitrationHost>, raw: RawRef) -> Self {
        Self {
            host,
            raw,
            _kind: PhantomData,
        }
    }

    /// Borrow the raw handle for a host call. Does not transfer ownership.
    pub fn raw(&self) -> RawRef {
        self.raw
    }

    /// Abandon the reference without releasing it. Used only by the
    /// degraded-shutdown path, where a detached thread may still be pumping
    /// the session.
    pub(crate) fn leak(self) {
        std::mem::forget(self);
    }
}

impl<T: HostObject> fmt::Debug for ScopedRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedRef")
            .field("kind", &T::NAME)
            .field("raw", &self.raw)
            .finish()
    }
}

impl<T: HostObject> Drop for ScopedRef<T> {
    fn drop(&mut self) {
        self.host.release(self.raw);
    }
}
