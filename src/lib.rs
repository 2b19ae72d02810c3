//! Runtime compatibility layer for ahead-of-time compiled scripts.
//!
//! Compiled code calls these helpers instead of interpreter bytecode. Each
//! helper takes borrowed host objects, and returns either a new owned host
//! object or a [`ShimError`] that compiled code re-raises in the host. The
//! host object model itself lives behind [`shimrt_core::Host`].
//!
//! ## Key Types
//!
//! - [`Shim`]: Process-wide state bound to one host (caches, configuration)
//! - [`ShimConfig`]: Startup configuration
//! - [`CachedBuiltin`]: A host built-in resolved once by name
//! - [`ShimError`]: Value / type / lookup / runtime / propagated / internal errors
//!
//! ## Example
//!
//! ```
//! use shimrt::prelude::*;
//! use shimrt_host::ReferenceHost;
//!
//! let host = ReferenceHost::new();
//! let shim = Shim::new(&host);
//! shim.initialize()?;
//!
//! let stop = host.own(host.new_int(3)?);
//! let list = shim.range(RangeArgs::Stop(stop.get()))?;
//! assert_eq!(host.size(list.get())?, 3);
//! # Ok::<(), ShimError>(())
//! ```

pub mod dispatch;
pub mod error;
pub mod frame;
pub mod import;
pub mod logging;
pub mod print;
pub mod range;
pub mod runtime;
pub mod scalar;
pub mod types;
mod unstream;

pub use dispatch::CachedBuiltin;
pub use error::{ShimError, ShimResult};
pub use import::{EmbeddedModules, StarTarget};
pub use logging::{LogFormat, LogLevel, LogOptions, init_logging};
pub use range::{RangeArgs, range_native, range1, range2};
pub use runtime::{ClassInitPolicy, Shim, ShimConfig};

pub use shimrt_core::{ExceptionKind, Host, HostError, HostResult, ObjRef, Owned};

pub mod prelude {
    pub use crate::import::{EmbeddedModules, StarTarget};
    pub use crate::print::{get_stdout, print_item, print_item_to, print_new_line, print_new_line_to};
    pub use crate::range::{RangeArgs, range_native, range1, range2};
    pub use crate::scalar::{chr, len, ord};
    pub use crate::types::type1;
    pub use crate::{ClassInitPolicy, Shim, ShimConfig, ShimError, ShimResult};
    pub use shimrt_core::{ExceptionKind, Host, HostError, ObjRef, Owned};
}
