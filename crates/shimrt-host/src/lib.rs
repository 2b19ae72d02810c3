//! Reference host object runtime for shimrt.
//!
//! [`ReferenceHost`] implements [`shimrt_core::Host`] over a
//! reference-counted generational heap. It carries just enough of a managed
//! object model to run the shim layer end to end: integers of both
//! precisions, byte and unicode text, tuples, lists, dicts, type objects with
//! metatypes and native slots, modules with an import registry, files with a
//! softspace flag, code and frame records, and a `pickle` module.
//!
//! # Example
//!
//! ```
//! use shimrt_core::Host;
//! use shimrt_host::ReferenceHost;
//!
//! let host = ReferenceHost::new();
//! let len = host.lookup_builtin("len").unwrap();
//! let text = host.new_str("abc").unwrap();
//! let size = host.call(len, &[text]).unwrap();
//! assert_eq!(host.as_i64(size), Ok(3));
//! for obj in [len, text, size] {
//!     host.decref(obj);
//! }
//! ```

mod builtins;
mod codec;
mod dict;
mod heap;
mod host;
mod import;
mod native;
mod object;

pub use builtins::MAX_RANGE_ITEMS;
pub use host::{BuiltinTypes, ClassSpec, FrameInfo, ReferenceHost};
pub use import::ModuleInit;
pub use native::{NativeCallable, NativeFn};
pub use object::TypeSlots;
