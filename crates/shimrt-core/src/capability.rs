//! Capability probes and record descriptors exchanged with the host.

use bitflags::bitflags;

use crate::ObjRef;

/// The three single-character representations the host distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKind {
    /// Immutable byte string
    Bytes,
    /// Mutable byte array
    ByteArray,
    /// Wide (unicode) text
    Unicode,
}

impl TextKind {
    /// How error messages refer to this representation.
    pub fn describe(self) -> &'static str {
        match self {
            TextKind::Bytes => "string",
            TextKind::ByteArray => "byte array",
            TextKind::Unicode => "unicode string",
        }
    }
}

/// Result of probing an object for a text/byte representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextProbe {
    pub kind: TextKind,
    /// Length in bytes (byte kinds) or code points (unicode).
    pub len: usize,
    /// First byte or code point, if any.
    pub first: Option<u32>,
}

bitflags! {
    /// Feature flags of a host type object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        /// Type supports the full class protocol (initializer slot is meaningful).
        const HAVE_CLASS = 1 << 0;
        /// Type object was allocated at runtime.
        const HEAPTYPE = 1 << 1;
        /// Type may be used as a base.
        const BASETYPE = 1 << 2;
        /// Instances are type objects.
        const TYPE_SUBCLASS = 1 << 3;
    }
}

/// Opaque identity of the host thread state a frame is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadState(pub u64);

/// Everything needed to build a code record.
///
/// All `ObjRef` fields are borrowed; the host takes its own references.
#[derive(Debug, Clone, Copy)]
pub struct CodeSpec {
    pub arg_count: u32,
    pub local_count: u32,
    pub stack_size: u32,
    pub flags: u32,
    /// Byte body (bytecode buffer).
    pub code: ObjRef,
    pub consts: ObjRef,
    pub names: ObjRef,
    pub varnames: ObjRef,
    pub freevars: ObjRef,
    pub cellvars: ObjRef,
    pub filename: ObjRef,
    pub name: ObjRef,
    pub first_line: u32,
    /// Line-number table.
    pub lnotab: ObjRef,
}
