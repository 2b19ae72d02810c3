//! Heap object layout.

use num_bigint::BigInt;
use shimrt_core::{ObjRef, ThreadState, TypeFlags};

use crate::dict::Dict;
use crate::native::NativeFn;

/// An object stored in the heap: its type plus its payload.
#[derive(Debug)]
pub struct HeapObject {
    /// Runtime type (one reference held)
    pub ty: ObjRef,
    pub payload: Payload,
}

impl HeapObject {
    pub fn new(ty: ObjRef, payload: Payload) -> Self {
        Self { ty, payload }
    }

    /// Every reference this object holds.
    pub fn collect_refs(&self, out: &mut Vec<ObjRef>) {
        out.push(self.ty);
        self.payload.collect_refs(out);
    }
}

/// Representation of each kind of host object.
#[derive(Debug)]
pub enum Payload {
    None,
    Bool(bool),
    Int(i64),
    Long(BigInt),
    Float(f64),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    Unicode(String),
    Buffer(Vec<u8>),
    Tuple(Vec<ObjRef>),
    List(Vec<ObjRef>),
    Dict(Dict),
    Type(TypeData),
    Instance(Dict),
    Module(ModuleData),
    Builtin(NativeFn),
    BoundMethod(BoundMethod),
    Code(CodeData),
    Frame(FrameData),
    File(FileData),
    Iter(IterData),
}

impl Payload {
    fn collect_refs(&self, out: &mut Vec<ObjRef>) {
        match self {
            Payload::Tuple(items) | Payload::List(items) => out.extend_from_slice(items),
            Payload::Dict(dict) | Payload::Instance(dict) => dict.collect_refs(out),
            Payload::Type(data) => {
                out.extend_from_slice(&data.bases);
                data.dict.collect_refs(out);
            }
            Payload::Module(data) => out.push(data.dict),
            Payload::BoundMethod(method) => out.push(method.receiver),
            Payload::Code(code) => out.extend_from_slice(&[
                code.code,
                code.consts,
                code.names,
                code.varnames,
                code.freevars,
                code.cellvars,
                code.filename,
                code.name,
                code.lnotab,
            ]),
            Payload::Frame(frame) => {
                out.push(frame.code);
                out.push(frame.globals);
                out.extend(frame.locals);
            }
            Payload::Iter(iter) => out.extend_from_slice(&iter.items),
            _ => {}
        }
    }
}

/// A type object.
#[derive(Debug)]
pub struct TypeData {
    pub name: String,
    pub bases: Vec<ObjRef>,
    pub dict: Dict,
    pub flags: TypeFlags,
    pub slots: TypeSlots,
}

/// Native capability slots of a type. Looked up through the bases.
#[derive(Debug, Clone, Default)]
pub struct TypeSlots {
    /// Integer conversion, called with `[obj]`.
    pub int: Option<NativeFn>,
    /// String conversion, called with `[obj]`.
    pub str: Option<NativeFn>,
    /// Initializer, called with `[obj, args_tuple]`.
    pub init: Option<NativeFn>,
}

#[derive(Debug)]
pub struct ModuleData {
    pub name: String,
    /// Attribute namespace (a dict object)
    pub dict: ObjRef,
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: ObjRef,
    pub function: NativeFn,
}

#[derive(Debug)]
pub struct CodeData {
    pub arg_count: u32,
    pub local_count: u32,
    pub stack_size: u32,
    pub flags: u32,
    pub code: ObjRef,
    pub consts: ObjRef,
    pub names: ObjRef,
    pub varnames: ObjRef,
    pub freevars: ObjRef,
    pub cellvars: ObjRef,
    pub filename: ObjRef,
    pub name: ObjRef,
    pub first_line: u32,
    pub lnotab: ObjRef,
}

#[derive(Debug)]
pub struct FrameData {
    pub thread: ThreadState,
    pub code: ObjRef,
    pub globals: ObjRef,
    pub locals: Option<ObjRef>,
    pub line: u32,
}

#[derive(Debug, Default)]
pub struct FileData {
    pub name: String,
    pub mode: String,
    pub buffer: Vec<u8>,
    pub position: usize,
    pub softspace: bool,
}

impl FileData {
    pub fn new(name: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: mode.into(),
            ..Self::default()
        }
    }

    pub fn writable(&self) -> bool {
        self.mode.contains(['w', 'a', '+'])
    }
}

#[derive(Debug)]
pub struct IterData {
    pub items: Vec<ObjRef>,
    pub position: usize,
}
