//! Object references and the scoped ownership guard.

use std::fmt;
use std::mem::ManuallyDrop;

use crate::Host;

/// Reference to a host-managed object.
///
/// An `ObjRef` carries no ownership by itself: whether it is a new reference
/// or a borrowed one is part of the contract of the call that produced it.
/// The generation lets the host detect stale references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjRef {
    /// Slot index in the host's object storage
    pub index: u32,
    /// Generation for use-after-free detection
    pub generation: u32,
}

impl ObjRef {
    /// Create a new object reference.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// A host object with exactly one reference credited to the holder.
///
/// The reference is released when the guard drops, so every exit path of a
/// helper (including `?` returns) releases its intermediates. Use
/// [`Owned::into_raw`] to hand the reference to the caller instead.
pub struct Owned<'h, H: Host + ?Sized> {
    host: &'h H,
    obj: ObjRef,
}

impl<'h, H: Host + ?Sized> Owned<'h, H> {
    /// Take ownership of a new reference.
    pub fn new(host: &'h H, obj: ObjRef) -> Self {
        Self { host, obj }
    }

    /// Acquire a new reference to a borrowed object.
    pub fn borrowed(host: &'h H, obj: ObjRef) -> Self {
        host.incref(obj);
        Self { host, obj }
    }

    /// The underlying reference, borrowed for as long as the guard lives.
    pub fn get(&self) -> ObjRef {
        self.obj
    }

    /// The host this reference belongs to.
    pub fn host(&self) -> &'h H {
        self.host
    }

    /// Give up the guard without releasing; the caller now owns the reference.
    pub fn into_raw(self) -> ObjRef {
        let this = ManuallyDrop::new(self);
        this.obj
    }
}

impl<H: Host + ?Sized> Clone for Owned<'_, H> {
    fn clone(&self) -> Self {
        Self::borrowed(self.host, self.obj)
    }
}

impl<H: Host + ?Sized> Drop for Owned<'_, H> {
    fn drop(&mut self) {
        self.host.decref(self.obj);
    }
}

impl<H: Host + ?Sized> fmt::Debug for Owned<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.obj).finish()
    }
}

impl<H: Host + ?Sized> PartialEq<ObjRef> for Owned<'_, H> {
    fn eq(&self, other: &ObjRef) -> bool {
        self.obj == *other
    }
}
