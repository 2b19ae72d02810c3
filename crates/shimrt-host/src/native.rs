//! Native function storage and callable trait.

use std::fmt;
use std::sync::Arc;

use shimrt_core::{HostResult, ObjRef};

use crate::ReferenceHost;

/// Trait for callable native functions.
///
/// Arguments are borrowed; the returned reference is new.
pub trait NativeCallable {
    fn call(&self, host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef>;
}

impl<F> NativeCallable for F
where
    F: Fn(&ReferenceHost, &[ObjRef]) -> HostResult<ObjRef>,
{
    fn call(&self, host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
        (self)(host, args)
    }
}

/// Type-erased native function.
///
/// The callable is shared through an `Arc`, so cloning a `NativeFn` out of
/// the heap before calling it is cheap and releases the heap borrow.
#[derive(Clone)]
pub struct NativeFn {
    pub name: &'static str,
    inner: Arc<dyn NativeCallable + Send + Sync>,
}

impl NativeFn {
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&ReferenceHost, &[ObjRef]) -> HostResult<ObjRef> + Send + Sync + 'static,
    {
        Self {
            name,
            inner: Arc::new(f),
        }
    }

    pub fn call(&self, host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
        self.inner.call(host, args)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
