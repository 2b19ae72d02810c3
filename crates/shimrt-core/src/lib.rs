//! Host object facade for the shimrt compatibility layer.
//!
//! The shim layer never owns object storage. Everything it does goes through
//! the [`Host`] trait defined here, which describes the managed-object runtime
//! that compiled code runs against.
//!
//! ## Key Types
//!
//! - [`ObjRef`]: Copyable reference to a host object (borrowed unless stated)
//! - [`Owned`]: Scoped guard holding exactly one credited reference
//! - [`Host`]: The operations the shim layer needs from the host runtime
//! - [`HostError`]: A raised host error (kind + formatted message)
//! - [`TextProbe`] / [`TypeFlags`] / [`CodeSpec`]: capability probes and descriptors

mod capability;
mod error;
mod handle;
mod host;

pub use capability::{CodeSpec, TextKind, TextProbe, ThreadState, TypeFlags};
pub use error::{ExceptionKind, HostError, HostResult};
pub use handle::{ObjRef, Owned};
pub use host::Host;
