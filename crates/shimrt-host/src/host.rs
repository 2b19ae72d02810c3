//! The reference host runtime.

use std::cell::{Cell, Ref, RefCell};

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use shimrt_core::{
    CodeSpec, ExceptionKind, Host, HostError, HostResult, ObjRef, TextKind, TextProbe, ThreadState,
    TypeFlags,
};

use crate::dict::{Dict, DictKey};
use crate::heap::ObjectHeap;
use crate::import::ModuleInit;
use crate::native::NativeFn;
use crate::object::{
    BoundMethod, CodeData, FileData, FrameData, HeapObject, IterData, ModuleData, Payload,
    TypeData, TypeSlots,
};
use crate::{builtins, codec};

const MAIN_THREAD: ThreadState = ThreadState(1);

/// Type objects for the built-in representations.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTypes {
    pub type_: ObjRef,
    pub object: ObjRef,
    pub none: ObjRef,
    pub bool_: ObjRef,
    pub int: ObjRef,
    pub long: ObjRef,
    pub float: ObjRef,
    pub str_: ObjRef,
    pub bytearray: ObjRef,
    pub unicode: ObjRef,
    pub buffer: ObjRef,
    pub tuple: ObjRef,
    pub list: ObjRef,
    pub dict: ObjRef,
    pub module: ObjRef,
    pub builtin: ObjRef,
    pub method: ObjRef,
    pub code: ObjRef,
    pub frame: ObjRef,
    pub file: ObjRef,
    pub iterator: ObjRef,
}

/// Slots and flags for a class created through [`ReferenceHost::new_class`].
#[derive(Debug, Clone, Default)]
pub struct ClassSpec {
    pub bases: Vec<ObjRef>,
    /// Metatype of the class; `type` when unset.
    pub metatype: Option<ObjRef>,
    pub flags: TypeFlags,
    pub slots: TypeSlots,
}

/// Snapshot of a frame record, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub filename: String,
    pub function: String,
    pub line: u32,
    pub code_first_line: u32,
    pub thread: ThreadState,
    pub has_locals: bool,
}

/// An in-process managed-object runtime.
///
/// Objects live in a reference-counted generational heap. Built-in types,
/// singletons, `sys` and `__builtin__` are created at construction and are
/// held by the host for its whole life.
pub struct ReferenceHost {
    heap: RefCell<ObjectHeap>,
    pub(crate) types: BuiltinTypes,
    none: ObjRef,
    true_: ObjRef,
    false_: ObjRef,
    empty_tuple: ObjRef,
    empty_str: ObjRef,
    pub(crate) sys: ObjRef,
    pub(crate) builtins: ObjRef,
    pub(crate) modules: ObjRef,
    pub(crate) registry: RefCell<FxHashMap<String, ModuleInit>>,
    line: Cell<u32>,
}

fn raw_type(heap: &mut ObjectHeap, meta: ObjRef, name: &str, bases: &[ObjRef]) -> ObjRef {
    heap.add_ref(meta);
    for base in bases {
        heap.add_ref(*base);
    }
    heap.allocate(HeapObject::new(
        meta,
        Payload::Type(TypeData {
            name: name.to_string(),
            bases: bases.to_vec(),
            dict: Dict::new(),
            flags: TypeFlags::HAVE_CLASS,
            slots: TypeSlots::default(),
        }),
    ))
}

fn raw_object(heap: &mut ObjectHeap, ty: ObjRef, payload: Payload) -> ObjRef {
    heap.add_ref(ty);
    heap.allocate(HeapObject::new(ty, payload))
}

impl ReferenceHost {
    /// Create a host with the built-in types and modules installed.
    pub fn new() -> Self {
        let mut heap = ObjectHeap::new();

        // `type` is its own type; `object` is patched in as its base.
        let type_ = heap.next_ref();
        heap.allocate(HeapObject::new(
            type_,
            Payload::Type(TypeData {
                name: "type".to_string(),
                bases: Vec::new(),
                dict: Dict::new(),
                flags: TypeFlags::HAVE_CLASS | TypeFlags::BASETYPE | TypeFlags::TYPE_SUBCLASS,
                slots: TypeSlots {
                    init: Some(NativeFn::new("type.__init__", builtins::type_init)),
                    ..TypeSlots::default()
                },
            }),
        ));
        let object = raw_type(&mut heap, type_, "object", &[]);
        heap.add_ref(object);
        if let Some(HeapObject {
            payload: Payload::Type(data),
            ..
        }) = heap.get_mut(type_)
        {
            data.bases.push(object);
        }

        let int = raw_type(&mut heap, type_, "int", &[object]);
        let types = BuiltinTypes {
            type_,
            object,
            none: raw_type(&mut heap, type_, "NoneType", &[object]),
            bool_: raw_type(&mut heap, type_, "bool", &[int]),
            int,
            long: raw_type(&mut heap, type_, "long", &[object]),
            float: raw_type(&mut heap, type_, "float", &[object]),
            str_: raw_type(&mut heap, type_, "str", &[object]),
            bytearray: raw_type(&mut heap, type_, "bytearray", &[object]),
            unicode: raw_type(&mut heap, type_, "unicode", &[object]),
            buffer: raw_type(&mut heap, type_, "buffer", &[object]),
            tuple: raw_type(&mut heap, type_, "tuple", &[object]),
            list: raw_type(&mut heap, type_, "list", &[object]),
            dict: raw_type(&mut heap, type_, "dict", &[object]),
            module: raw_type(&mut heap, type_, "module", &[object]),
            builtin: raw_type(&mut heap, type_, "builtin_function_or_method", &[object]),
            method: raw_type(&mut heap, type_, "instancemethod", &[object]),
            code: raw_type(&mut heap, type_, "code", &[object]),
            frame: raw_type(&mut heap, type_, "frame", &[object]),
            file: raw_type(&mut heap, type_, "file", &[object]),
            iterator: raw_type(&mut heap, type_, "iterator", &[object]),
        };

        let none = raw_object(&mut heap, types.none, Payload::None);
        let true_ = raw_object(&mut heap, types.bool_, Payload::Bool(true));
        let false_ = raw_object(&mut heap, types.bool_, Payload::Bool(false));
        let empty_tuple = raw_object(&mut heap, types.tuple, Payload::Tuple(Vec::new()));
        let empty_str = raw_object(&mut heap, types.str_, Payload::Bytes(Vec::new()));

        let modules = raw_object(&mut heap, types.dict, Payload::Dict(Dict::new()));
        let sys_dict = raw_object(&mut heap, types.dict, Payload::Dict(Dict::new()));
        let sys = raw_object(
            &mut heap,
            types.module,
            Payload::Module(ModuleData {
                name: "sys".to_string(),
                dict: sys_dict,
            }),
        );
        let builtins_dict = raw_object(&mut heap, types.dict, Payload::Dict(Dict::new()));
        let builtins = raw_object(
            &mut heap,
            types.module,
            Payload::Module(ModuleData {
                name: "__builtin__".to_string(),
                dict: builtins_dict,
            }),
        );

        let host = Self {
            heap: RefCell::new(heap),
            types,
            none,
            true_,
            false_,
            empty_tuple,
            empty_str,
            sys,
            builtins,
            modules,
            registry: RefCell::new(FxHashMap::default()),
            line: Cell::new(0),
        };
        host.install_core_modules();
        host
    }

    fn install_core_modules(&self) {
        let setup = || -> HostResult<()> {
            let stdout = self.new_file("<stdout>", "w");
            self.set_attr(self.sys, "__name__", self.own(self.new_str("sys")?).get())?;
            self.set_attr(self.sys, "modules", self.modules)?;
            self.set_attr(self.sys, "stdout", stdout)?;
            self.decref(stdout);

            self.set_attr(self.builtins, "__name__", self.own(self.new_str("__builtin__")?).get())?;
            self.set_attr(self.builtins, "None", self.none)?;
            self.set_attr(self.builtins, "True", self.true_)?;
            self.set_attr(self.builtins, "False", self.false_)?;
            self.set_attr(self.builtins, "type", self.types.type_)?;
            self.set_attr(self.builtins, "object", self.types.object)?;
            for function in builtins::functions() {
                let name = function.name;
                let object = self.own(self.new_builtin(function));
                self.set_attr(self.builtins, name, object.get())?;
            }

            let sys_name = self.own(self.new_str("sys")?);
            self.set_item(self.modules, sys_name.get(), self.sys)?;
            let builtins_name = self.own(self.new_str("__builtin__")?);
            self.set_item(self.modules, builtins_name.get(), self.builtins)?;
            Ok(())
        };
        if let Err(err) = setup() {
            tracing::error!(target: "shimrt_host", error = %err, "core module setup failed");
        }
        codec::register_pickle(self);
    }

    // =========================================================================
    // Heap access
    // =========================================================================

    fn object(&self, obj: ObjRef) -> Option<Ref<'_, HeapObject>> {
        Ref::filter_map(self.heap.borrow(), |heap| heap.get(obj)).ok()
    }

    pub(crate) fn with_payload<R>(&self, obj: ObjRef, f: impl FnOnce(&Payload) -> R) -> Option<R> {
        self.object(obj).map(|o| f(&o.payload))
    }

    pub(crate) fn with_payload_mut<R>(
        &self,
        obj: ObjRef,
        f: impl FnOnce(&mut Payload) -> R,
    ) -> Option<R> {
        let mut heap = self.heap.borrow_mut();
        heap.get_mut(obj).map(|o| f(&mut o.payload))
    }

    /// Allocate an object of type `ty`, returning a new reference.
    pub(crate) fn alloc(&self, ty: ObjRef, payload: Payload) -> ObjRef {
        let mut heap = self.heap.borrow_mut();
        heap.add_ref(ty);
        heap.allocate(HeapObject::new(ty, payload))
    }

    /// Number of objects currently alive.
    pub fn live_objects(&self) -> usize {
        self.heap.borrow().live_count()
    }

    /// Reference count of an object, `None` once it is freed.
    pub fn ref_count(&self, obj: ObjRef) -> Option<u32> {
        self.heap.borrow().ref_count(obj)
    }

    pub fn types(&self) -> &BuiltinTypes {
        &self.types
    }

    pub fn false_object(&self) -> ObjRef {
        self.false_
    }

    // =========================================================================
    // Constructors beyond the Host contract
    // =========================================================================

    pub fn new_unicode(&self, text: &str) -> ObjRef {
        self.alloc(self.types.unicode, Payload::Unicode(text.to_string()))
    }

    pub fn new_bytearray(&self, data: &[u8]) -> ObjRef {
        self.alloc(self.types.bytearray, Payload::ByteArray(data.to_vec()))
    }

    pub fn new_float(&self, value: f64) -> ObjRef {
        self.alloc(self.types.float, Payload::Float(value))
    }

    /// An integer object, using the machine representation when it fits.
    pub fn new_integer(&self, value: BigInt) -> ObjRef {
        match value.to_i64() {
            Some(small) => self.alloc(self.types.int, Payload::Int(small)),
            None => self.alloc(self.types.long, Payload::Long(value)),
        }
    }

    /// An integer object that always uses the arbitrary-precision representation.
    pub fn new_long(&self, value: BigInt) -> ObjRef {
        self.alloc(self.types.long, Payload::Long(value))
    }

    pub fn new_dict(&self) -> ObjRef {
        self.alloc(self.types.dict, Payload::Dict(Dict::new()))
    }

    pub(crate) fn new_list_from(&self, items: Vec<ObjRef>) -> ObjRef {
        self.alloc(self.types.list, Payload::List(items))
    }

    pub fn new_builtin(&self, function: NativeFn) -> ObjRef {
        self.alloc(self.types.builtin, Payload::Builtin(function))
    }

    pub fn new_file(&self, name: &str, mode: &str) -> ObjRef {
        self.alloc(self.types.file, Payload::File(FileData::new(name, mode)))
    }

    pub(crate) fn new_file_with(&self, data: FileData) -> ObjRef {
        self.alloc(self.types.file, Payload::File(data))
    }

    fn bound_method(&self, receiver: ObjRef, function: NativeFn) -> ObjRef {
        self.incref(receiver);
        self.alloc(
            self.types.method,
            Payload::BoundMethod(BoundMethod { receiver, function }),
        )
    }

    /// Create a class (or metatype, when `spec.metatype` derives from `type`).
    pub fn new_class(&self, name: &str, spec: ClassSpec) -> ObjRef {
        let meta = spec.metatype.unwrap_or(self.types.type_);
        let bases = if spec.bases.is_empty() {
            vec![self.types.object]
        } else {
            spec.bases
        };
        for base in &bases {
            self.incref(*base);
        }
        self.alloc(
            meta,
            Payload::Type(TypeData {
                name: name.to_string(),
                bases,
                dict: Dict::new(),
                flags: spec.flags | TypeFlags::HEAPTYPE,
                slots: spec.slots,
            }),
        )
    }

    /// Create an empty instance of a class.
    pub fn new_instance(&self, class: ObjRef) -> ObjRef {
        self.alloc(class, Payload::Instance(Dict::new()))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// The value of an integral object.
    pub fn int_value(&self, obj: ObjRef) -> Option<BigInt> {
        self.with_payload(obj, |payload| match payload {
            Payload::Bool(b) => Some(BigInt::from(*b as i64)),
            Payload::Int(v) => Some(BigInt::from(*v)),
            Payload::Long(v) => Some(v.clone()),
            _ => None,
        })
        .flatten()
    }

    /// The items of a list or tuple (borrowed).
    pub fn sequence_items(&self, obj: ObjRef) -> Option<Vec<ObjRef>> {
        self.with_payload(obj, |payload| match payload {
            Payload::List(items) | Payload::Tuple(items) => Some(items.clone()),
            _ => None,
        })
        .flatten()
    }

    /// Bytes written to a file object.
    pub fn file_contents(&self, file: ObjRef) -> Option<String> {
        self.with_payload(file, |payload| match payload {
            Payload::File(data) => Some(String::from_utf8_lossy(&data.buffer).into_owned()),
            _ => None,
        })
        .flatten()
    }

    /// Everything written to the current `sys.stdout`.
    pub fn stdout_text(&self) -> String {
        self.sys_object("stdout")
            .and_then(|stdout| self.file_contents(stdout))
            .unwrap_or_default()
    }

    pub fn frame_info(&self, frame: ObjRef) -> Option<FrameInfo> {
        let (code, line, thread, has_locals) = self
            .with_payload(frame, |payload| match payload {
                Payload::Frame(data) => Some((data.code, data.line, data.thread, data.locals.is_some())),
                _ => None,
            })
            .flatten()?;
        let (filename, function, first_line) = self
            .with_payload(code, |payload| match payload {
                Payload::Code(data) => Some((data.filename, data.name, data.first_line)),
                _ => None,
            })
            .flatten()?;
        Some(FrameInfo {
            filename: self.text_contents(filename)?,
            function: self.text_contents(function)?,
            line,
            code_first_line: first_line,
            thread,
            has_locals,
        })
    }

    /// Counts stored in a code record: `(args, locals, stack size, flags)`.
    pub fn code_counts(&self, code: ObjRef) -> Option<(u32, u32, u32, u32)> {
        self.with_payload(code, |payload| match payload {
            Payload::Code(data) => Some((data.arg_count, data.local_count, data.stack_size, data.flags)),
            _ => None,
        })
        .flatten()
    }

    /// The code record a frame is bound to (borrowed).
    pub fn frame_code(&self, frame: ObjRef) -> Option<ObjRef> {
        self.with_payload(frame, |payload| match payload {
            Payload::Frame(data) => Some(data.code),
            _ => None,
        })
        .flatten()
    }

    /// The globals a frame is bound to (borrowed).
    pub fn frame_globals(&self, frame: ObjRef) -> Option<ObjRef> {
        self.with_payload(frame, |payload| match payload {
            Payload::Frame(data) => Some(data.globals),
            _ => None,
        })
        .flatten()
    }

    /// Replace or remove a `sys` attribute.
    pub fn set_sys_object(&self, name: &str, value: Option<ObjRef>) -> HostResult<()> {
        match value {
            Some(value) => self.set_attr(self.sys, name, value),
            None => {
                let dict = self.module_dict_ref(self.sys)?;
                self.dict_remove(dict, &DictKey::Str(name.to_string()));
                Ok(())
            }
        }
    }

    /// Structural equality, as the host's `==` would report it.
    pub fn objects_equal(&self, a: ObjRef, b: ObjRef) -> bool {
        if a == b {
            return true;
        }
        // Integers compare exactly; only mixed float comparisons go through f64.
        if let (Some(x), Some(y)) = (self.int_value(a), self.int_value(b)) {
            return x == y;
        }
        if let (Some(x), Some(y)) = (self.numeric(a), self.numeric(b)) {
            return x == y;
        }
        enum Shape {
            Text(String),
            Seq(bool, Vec<ObjRef>),
            Map(Vec<(ObjRef, ObjRef)>),
            Raw(Vec<u8>),
            Other,
        }
        let shape = |obj: ObjRef| {
            self.with_payload(obj, |payload| match payload {
                Payload::Bytes(b) => Shape::Text(String::from_utf8_lossy(b).into_owned()),
                Payload::Unicode(s) => Shape::Text(s.clone()),
                Payload::ByteArray(b) | Payload::Buffer(b) => Shape::Raw(b.clone()),
                Payload::List(items) => Shape::Seq(true, items.clone()),
                Payload::Tuple(items) => Shape::Seq(false, items.clone()),
                Payload::Dict(dict) => Shape::Map(dict.entries().to_vec()),
                _ => Shape::Other,
            })
            .unwrap_or(Shape::Other)
        };
        match (shape(a), shape(b)) {
            (Shape::Text(x), Shape::Text(y)) => x == y,
            (Shape::Raw(x), Shape::Raw(y)) => x == y,
            (Shape::Seq(lx, x), Shape::Seq(ly, y)) => {
                lx == ly
                    && x.len() == y.len()
                    && x.iter().zip(&y).all(|(p, q)| self.objects_equal(*p, *q))
            }
            (Shape::Map(x), Shape::Map(y)) => {
                x.len() == y.len()
                    && x.iter().all(|(key, value)| {
                        let Ok(id) = self.dict_key(*key) else {
                            return false;
                        };
                        y.iter().any(|(other_key, other_value)| {
                            self.dict_key(*other_key).is_ok_and(|other| other == id)
                                && self.objects_equal(*value, *other_value)
                        })
                    })
            }
            _ => false,
        }
    }

    fn numeric(&self, obj: ObjRef) -> Option<OrderedFloat<f64>> {
        self.with_payload(obj, |payload| match payload {
            Payload::Bool(b) => Some(OrderedFloat(*b as i64 as f64)),
            Payload::Int(v) => Some(OrderedFloat(*v as f64)),
            Payload::Long(v) => v.to_f64().map(OrderedFloat),
            Payload::Float(v) => Some(OrderedFloat(*v)),
            _ => None,
        })
        .flatten()
    }

    // =========================================================================
    // Dict plumbing
    // =========================================================================

    /// Hash identity of a key object.
    pub(crate) fn dict_key(&self, key: ObjRef) -> HostResult<DictKey> {
        enum Probe {
            Done(DictKey),
            Tuple(Vec<ObjRef>),
            Unhashable,
        }
        let probe = self
            .with_payload(key, |payload| match payload {
                Payload::None => Probe::Done(DictKey::None),
                Payload::Bool(b) => Probe::Done(DictKey::Int(*b as i64)),
                Payload::Int(v) => Probe::Done(DictKey::Int(*v)),
                Payload::Long(v) => Probe::Done(match v.to_i64() {
                    Some(small) => DictKey::Int(small),
                    None => DictKey::Long(v.clone()),
                }),
                Payload::Float(f) => Probe::Done(
                    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        DictKey::Int(*f as i64)
                    } else {
                        DictKey::Float(OrderedFloat(*f))
                    },
                ),
                Payload::Bytes(b) => Probe::Done(DictKey::Str(String::from_utf8_lossy(b).into_owned())),
                Payload::Unicode(s) => Probe::Done(DictKey::Str(s.clone())),
                Payload::Tuple(items) => Probe::Tuple(items.clone()),
                Payload::List(_) | Payload::Dict(_) | Payload::ByteArray(_) => Probe::Unhashable,
                _ => Probe::Done(DictKey::Identity(key)),
            })
            .unwrap_or(Probe::Done(DictKey::Identity(key)));
        match probe {
            Probe::Done(id) => Ok(id),
            Probe::Tuple(items) => items
                .into_iter()
                .map(|item| self.dict_key(item))
                .collect::<HostResult<Vec<_>>>()
                .map(DictKey::Tuple),
            Probe::Unhashable => Err(HostError::type_error(format!(
                "unhashable type: '{}'",
                self.type_name_of(key)
            ))),
        }
    }

    /// Borrowed value stored under `key` in a dict object.
    pub(crate) fn dict_get(&self, dict: ObjRef, key: &DictKey) -> Option<ObjRef> {
        self.with_payload(dict, |payload| match payload {
            Payload::Dict(d) => d.get(key),
            _ => None,
        })
        .flatten()
    }

    /// Store into the dict owned by `owner` (a dict, an instance, or a type).
    fn store_entry(&self, owner: ObjRef, key: ObjRef, value: ObjRef) -> HostResult<()> {
        let id = self.dict_key(key)?;
        self.incref(key);
        self.incref(value);
        let outcome = self.with_payload_mut(owner, |payload| match payload {
            Payload::Dict(d) | Payload::Instance(d) => Ok(d.insert(id, key, value)),
            Payload::Type(data) => Ok(data.dict.insert(id, key, value)),
            _ => Err(()),
        });
        match outcome {
            Some(Ok(dropped)) => {
                if let Some((k, v)) = dropped {
                    self.decref(k);
                    self.decref(v);
                }
                Ok(())
            }
            _ => {
                self.decref(key);
                self.decref(value);
                Err(HostError::new(
                    ExceptionKind::System,
                    "bad argument to internal function",
                ))
            }
        }
    }

    fn store_named(&self, owner: ObjRef, name: &str, value: ObjRef) -> HostResult<()> {
        let key = self.own(self.new_str(name)?);
        self.store_entry(owner, key.get(), value)
    }

    pub(crate) fn dict_remove(&self, dict: ObjRef, key: &DictKey) -> bool {
        let removed = self
            .with_payload_mut(dict, |payload| match payload {
                Payload::Dict(d) => d.remove(key),
                _ => None,
            })
            .flatten();
        match removed {
            Some((k, v)) => {
                self.decref(k);
                self.decref(v);
                true
            }
            None => false,
        }
    }

    /// Borrowed attribute namespace of a module.
    pub(crate) fn module_dict_ref(&self, module: ObjRef) -> HostResult<ObjRef> {
        self.with_payload(module, |payload| match payload {
            Payload::Module(data) => Some(data.dict),
            _ => None,
        })
        .flatten()
        .ok_or_else(|| {
            HostError::type_error(format!("'{}' object is not a module", self.type_name_of(module)))
        })
    }

    // =========================================================================
    // Type plumbing
    // =========================================================================

    /// Method resolution order: depth-first, left to right, without repeats.
    fn mro(&self, ty: ObjRef) -> Vec<ObjRef> {
        let mut order = Vec::new();
        let mut pending = vec![ty];
        while let Some(next) = pending.pop() {
            if order.contains(&next) {
                continue;
            }
            order.push(next);
            if let Some(bases) = self
                .with_payload(next, |payload| match payload {
                    Payload::Type(data) => Some(data.bases.clone()),
                    _ => None,
                })
                .flatten()
            {
                pending.extend(bases.into_iter().rev());
            }
        }
        order
    }

    fn find_slot(&self, ty: ObjRef, pick: impl Fn(&TypeSlots) -> Option<NativeFn>) -> Option<NativeFn> {
        self.mro(ty).into_iter().find_map(|t| {
            self.with_payload(t, |payload| match payload {
                Payload::Type(data) => pick(&data.slots),
                _ => None,
            })
            .flatten()
        })
    }

    /// Borrowed attribute found in the type dicts along the MRO.
    fn type_lookup(&self, ty: ObjRef, key: &DictKey) -> Option<ObjRef> {
        self.mro(ty).into_iter().find_map(|t| {
            self.with_payload(t, |payload| match payload {
                Payload::Type(data) => data.dict.get(key),
                _ => None,
            })
            .flatten()
        })
    }

    fn is_type_object(&self, obj: ObjRef) -> bool {
        matches!(self.with_payload(obj, |p| matches!(p, Payload::Type(_))), Some(true))
    }

    fn call_type(&self, ty: ObjRef, args: &[ObjRef]) -> HostResult<ObjRef> {
        if ty == self.types.type_ && args.len() == 1 {
            let result = self.type_of(args[0]);
            self.incref(result);
            return Ok(result);
        }
        if self.is_subtype(ty, self.types.type_) {
            if args.len() != 3 {
                return Err(HostError::type_error("type() takes 1 or 3 arguments"));
            }
            let tuple = self.own(self.new_tuple(args)?);
            let result = self.own(self.type_new(ty, tuple.get())?);
            let produced = self.type_of(result.get());
            if self.is_subtype(produced, self.types.type_) {
                self.call_init(produced, result.get(), tuple.get())?;
            }
            return Ok(result.into_raw());
        }
        let heap_type = self.type_flags(ty).contains(TypeFlags::HEAPTYPE);
        if !heap_type {
            return Err(HostError::type_error(format!(
                "cannot create '{}' instances",
                self.type_name(ty)
            )));
        }
        let instance = self.own(self.new_instance(ty));
        if self.has_init(ty) {
            let tuple = self.own(self.new_tuple(args)?);
            self.call_init(ty, instance.get(), tuple.get())?;
        }
        Ok(instance.into_raw())
    }

    // =========================================================================
    // Text rendering
    // =========================================================================

    /// Render `obj` as its `str()` (or `repr()`) text.
    pub(crate) fn render(&self, obj: ObjRef, repr: bool) -> HostResult<String> {
        if let Some(slot) = (!repr)
            .then(|| self.find_slot(self.type_of(obj), |s| s.str.clone()))
            .flatten()
        {
            let result = self.own(slot.call(self, &[obj])?);
            return self.text_contents(result.get()).ok_or_else(|| {
                HostError::type_error(format!(
                    "__str__ returned non-string (type {})",
                    self.type_name_of(result.get())
                ))
            });
        }

        enum Shape {
            Text(String),
            Items(&'static str, &'static str, Vec<ObjRef>),
            Map(Vec<(ObjRef, ObjRef)>),
            Unicode(String),
        }
        let type_name = self.type_name_of(obj);
        let shape = self
            .with_payload(obj, |payload| match payload {
                Payload::None => Shape::Text("None".into()),
                Payload::Bool(b) => Shape::Text(if *b { "True" } else { "False" }.into()),
                Payload::Int(v) => Shape::Text(v.to_string()),
                Payload::Long(v) => Shape::Text(if repr { format!("{v}L") } else { v.to_string() }),
                Payload::Float(v) => Shape::Text(format_float(*v)),
                Payload::Bytes(b) => {
                    let text = String::from_utf8_lossy(b).into_owned();
                    Shape::Text(if repr { format!("'{}'", text.escape_default()) } else { text })
                }
                Payload::Unicode(s) => Shape::Unicode(s.clone()),
                Payload::ByteArray(b) => Shape::Text(format!(
                    "bytearray(b'{}')",
                    String::from_utf8_lossy(b).escape_default()
                )),
                Payload::Buffer(_) => Shape::Text("<read-only buffer>".into()),
                Payload::Tuple(items) => Shape::Items("(", ")", items.clone()),
                Payload::List(items) => Shape::Items("[", "]", items.clone()),
                Payload::Dict(d) => Shape::Map(d.entries().to_vec()),
                Payload::Type(data) => Shape::Text(format!("<type '{}'>", data.name)),
                Payload::Module(data) => Shape::Text(format!("<module '{}'>", data.name)),
                Payload::Builtin(f) => Shape::Text(format!("<built-in function {}>", f.name)),
                Payload::BoundMethod(m) => Shape::Text(format!("<built-in method {}>", m.function.name)),
                Payload::Code(_) => Shape::Text(format!("<code object at 0x{:x}>", obj.index)),
                Payload::Frame(_) => Shape::Text(format!("<frame object at 0x{:x}>", obj.index)),
                Payload::File(data) => Shape::Text(format!(
                    "<open file '{}', mode '{}'>",
                    data.name, data.mode
                )),
                Payload::Iter(_) => Shape::Text(format!("<iterator object at 0x{:x}>", obj.index)),
                Payload::Instance(_) => {
                    Shape::Text(format!("<{type_name} object at 0x{:x}>", obj.index))
                }
            })
            .ok_or_else(|| HostError::new(ExceptionKind::System, "stale object reference"))?;

        match shape {
            Shape::Text(text) => Ok(text),
            Shape::Unicode(text) => {
                if repr {
                    return Ok(format!("u'{}'", text.escape_default()));
                }
                match text.char_indices().find(|(_, c)| !c.is_ascii()) {
                    None => Ok(text),
                    Some((position, c)) => Err(HostError::new(
                        ExceptionKind::UnicodeEncode,
                        format!(
                            "'ascii' codec can't encode character u'\\x{:x}' in position {}: ordinal not in range(128)",
                            c as u32,
                            text[..position].chars().count()
                        ),
                    )),
                }
            }
            Shape::Items(open, close, items) => {
                let rendered = items
                    .iter()
                    .map(|item| self.render(*item, true))
                    .collect::<HostResult<Vec<_>>>()?;
                let trailing = if open == "(" && rendered.len() == 1 { "," } else { "" };
                Ok(format!("{open}{}{trailing}{close}", rendered.join(", ")))
            }
            Shape::Map(entries) => {
                let rendered = entries
                    .iter()
                    .map(|(k, v)| Ok(format!("{}: {}", self.render(*k, true)?, self.render(*v, true)?)))
                    .collect::<HostResult<Vec<_>>>()?;
                Ok(format!("{{{}}}", rendered.join(", ")))
            }
        }
    }

    fn append_to_file(&self, file: ObjRef, data: &[u8]) -> HostResult<()> {
        let outcome = self.with_payload_mut(file, |payload| match payload {
            Payload::File(f) if f.writable() => {
                f.buffer.extend_from_slice(data);
                Ok(true)
            }
            Payload::File(_) => Err(HostError::new(ExceptionKind::Io, "File not open for writing")),
            _ => Ok(false),
        });
        match outcome {
            Some(Ok(true)) => Ok(()),
            Some(Err(err)) => Err(err),
            _ => {
                // Any object with a `write` method is a stream.
                let write = self.own(self.get_attr(file, "write")?);
                let text = self.own(self.new_bytes(data)?);
                let result = self.call(write.get(), &[text.get()])?;
                self.decref(result);
                Ok(())
            }
        }
    }
}

impl Default for ReferenceHost {
    fn default() -> Self {
        Self::new()
    }
}

fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{value}")
    }
}

fn index_into(len: usize, index: i64) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    (resolved >= 0 && (resolved as usize) < len).then_some(resolved as usize)
}

impl Host for ReferenceHost {
    fn incref(&self, obj: ObjRef) {
        self.heap.borrow_mut().add_ref(obj);
    }

    fn decref(&self, obj: ObjRef) {
        let mut pending = vec![obj];
        while let Some(next) = pending.pop() {
            let freed = self.heap.borrow_mut().release(next);
            if let Some(object) = freed {
                object.collect_refs(&mut pending);
            }
        }
    }

    fn none(&self) -> ObjRef {
        self.none
    }

    fn true_object(&self) -> ObjRef {
        self.true_
    }

    fn empty_tuple(&self) -> ObjRef {
        self.empty_tuple
    }

    fn empty_str(&self) -> ObjRef {
        self.empty_str
    }

    fn type_type(&self) -> ObjRef {
        self.types.type_
    }

    fn new_int(&self, value: i64) -> HostResult<ObjRef> {
        Ok(self.alloc(self.types.int, Payload::Int(value)))
    }

    fn new_str(&self, text: &str) -> HostResult<ObjRef> {
        Ok(self.alloc(self.types.str_, Payload::Bytes(text.as_bytes().to_vec())))
    }

    fn new_bytes(&self, data: &[u8]) -> HostResult<ObjRef> {
        Ok(self.alloc(self.types.str_, Payload::Bytes(data.to_vec())))
    }

    fn new_tuple(&self, items: &[ObjRef]) -> HostResult<ObjRef> {
        if items.is_empty() {
            self.incref(self.empty_tuple);
            return Ok(self.empty_tuple);
        }
        for item in items {
            self.incref(*item);
        }
        Ok(self.alloc(self.types.tuple, Payload::Tuple(items.to_vec())))
    }

    fn new_list(&self) -> HostResult<ObjRef> {
        Ok(self.new_list_from(Vec::new()))
    }

    fn list_append(&self, list: ObjRef, item: ObjRef) -> HostResult<()> {
        self.incref(item);
        let appended = self.with_payload_mut(list, |payload| match payload {
            Payload::List(items) => {
                items.push(item);
                true
            }
            _ => false,
        });
        if appended == Some(true) {
            Ok(())
        } else {
            self.decref(item);
            Err(HostError::new(ExceptionKind::System, "bad argument to internal function"))
        }
    }

    fn new_buffer(&self, data: &[u8]) -> HostResult<ObjRef> {
        Ok(self.alloc(self.types.buffer, Payload::Buffer(data.to_vec())))
    }

    fn type_of(&self, obj: ObjRef) -> ObjRef {
        self.object(obj).map(|o| o.ty).unwrap_or(self.types.object)
    }

    fn type_name(&self, ty: ObjRef) -> String {
        self.with_payload(ty, |payload| match payload {
            Payload::Type(data) => data.name.clone(),
            _ => "?".to_string(),
        })
        .unwrap_or_else(|| "?".to_string())
    }

    fn is_integral(&self, obj: ObjRef) -> bool {
        matches!(
            self.with_payload(obj, |p| matches!(p, Payload::Bool(_) | Payload::Int(_) | Payload::Long(_))),
            Some(true)
        )
    }

    fn integer_slot(&self, obj: ObjRef) -> Option<HostResult<ObjRef>> {
        enum Conversion {
            Identity,
            Small(i64),
            Float(f64),
            Slot,
        }
        let conversion = self.with_payload(obj, |payload| match payload {
            Payload::Int(_) | Payload::Long(_) => Some(Conversion::Identity),
            Payload::Bool(b) => Some(Conversion::Small(*b as i64)),
            Payload::Float(f) => Some(Conversion::Float(*f)),
            Payload::Instance(_) => Some(Conversion::Slot),
            _ => None,
        })??;
        match conversion {
            Conversion::Identity => {
                self.incref(obj);
                Some(Ok(obj))
            }
            Conversion::Small(v) => Some(self.new_int(v)),
            Conversion::Float(f) => Some(if f.is_nan() {
                Err(HostError::value("cannot convert float NaN to integer"))
            } else if f.is_infinite() {
                Err(HostError::overflow("cannot convert float infinity to integer"))
            } else {
                BigInt::from_f64(f.trunc())
                    .map(|value| self.new_integer(value))
                    .ok_or_else(|| HostError::value("cannot convert float to integer"))
            }),
            Conversion::Slot => {
                let slot = self.find_slot(self.type_of(obj), |s| s.int.clone())?;
                Some(slot.call(self, &[obj]).and_then(|result| {
                    if self.is_integral(result) {
                        Ok(result)
                    } else {
                        let name = self.type_name_of(result);
                        self.decref(result);
                        Err(HostError::type_error(format!("__int__ returned non-int (type {name})")))
                    }
                }))
            }
        }
    }

    fn as_i64(&self, obj: ObjRef) -> HostResult<i64> {
        self.with_payload(obj, |payload| match payload {
            Payload::Bool(b) => Ok(*b as i64),
            Payload::Int(v) => Ok(*v),
            Payload::Long(v) => v
                .to_i64()
                .ok_or_else(|| HostError::overflow("Python int too large to convert to C long")),
            _ => Err(HostError::type_error("an integer is required")),
        })
        .unwrap_or_else(|| Err(HostError::type_error("an integer is required")))
    }

    fn text_probe(&self, obj: ObjRef) -> Option<TextProbe> {
        self.with_payload(obj, |payload| match payload {
            Payload::Bytes(b) => Some(TextProbe {
                kind: TextKind::Bytes,
                len: b.len(),
                first: b.first().map(|&c| c as u32),
            }),
            Payload::ByteArray(b) => Some(TextProbe {
                kind: TextKind::ByteArray,
                len: b.len(),
                first: b.first().map(|&c| c as u32),
            }),
            Payload::Unicode(s) => Some(TextProbe {
                kind: TextKind::Unicode,
                len: s.chars().count(),
                first: s.chars().next().map(|c| c as u32),
            }),
            _ => None,
        })
        .flatten()
    }

    fn text_contents(&self, obj: ObjRef) -> Option<String> {
        self.with_payload(obj, |payload| match payload {
            Payload::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Payload::Unicode(s) => Some(s.clone()),
            _ => None,
        })
        .flatten()
    }

    fn is_text(&self, obj: ObjRef) -> bool {
        matches!(
            self.with_payload(obj, |p| matches!(p, Payload::Bytes(_) | Payload::Unicode(_))),
            Some(true)
        )
    }

    fn is_code(&self, obj: ObjRef) -> bool {
        matches!(self.with_payload(obj, |p| matches!(p, Payload::Code(_))), Some(true))
    }

    fn is_file(&self, obj: ObjRef) -> bool {
        matches!(self.with_payload(obj, |p| matches!(p, Payload::File(_))), Some(true))
    }

    fn size(&self, obj: ObjRef) -> HostResult<usize> {
        self.with_payload(obj, |payload| match payload {
            Payload::Bytes(b) | Payload::ByteArray(b) | Payload::Buffer(b) => Some(b.len()),
            Payload::Unicode(s) => Some(s.chars().count()),
            Payload::Tuple(items) | Payload::List(items) => Some(items.len()),
            Payload::Dict(d) => Some(d.len()),
            _ => None,
        })
        .flatten()
        .ok_or_else(|| {
            HostError::type_error(format!(
                "object of type '{}' has no len()",
                self.type_name_of(obj)
            ))
        })
    }

    fn type_flags(&self, ty: ObjRef) -> TypeFlags {
        self.with_payload(ty, |payload| match payload {
            Payload::Type(data) => data.flags,
            _ => TypeFlags::empty(),
        })
        .unwrap_or_default()
    }

    fn is_subtype(&self, ty: ObjRef, base: ObjRef) -> bool {
        self.is_type_object(ty) && self.mro(ty).contains(&base)
    }

    fn type_new(&self, metatype: ObjRef, args: ObjRef) -> HostResult<ObjRef> {
        let parts = self.sequence_items(args).filter(|_| {
            matches!(self.with_payload(args, |p| matches!(p, Payload::Tuple(_))), Some(true))
        });
        let [name, bases, dict] = match parts.as_deref() {
            Some([name, bases, dict]) => [*name, *bases, *dict],
            Some(_) => return Err(HostError::type_error("type() takes 1 or 3 arguments")),
            None => {
                return Err(HostError::new(
                    ExceptionKind::System,
                    "bad argument to internal function",
                ));
            }
        };

        let name_text = self
            .with_payload(name, |payload| match payload {
                Payload::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
                _ => None,
            })
            .flatten()
            .ok_or_else(|| {
                HostError::type_error(format!(
                    "type() argument 1 must be string, not {}",
                    self.type_name_of(name)
                ))
            })?;
        let mut base_list = self
            .with_payload(bases, |payload| match payload {
                Payload::Tuple(items) => Some(items.clone()),
                _ => None,
            })
            .flatten()
            .ok_or_else(|| {
                HostError::type_error(format!(
                    "type() argument 2 must be tuple, not {}",
                    self.type_name_of(bases)
                ))
            })?;
        let entries = self
            .with_payload(dict, |payload| match payload {
                Payload::Dict(d) => Some(d.entries().to_vec()),
                _ => None,
            })
            .flatten()
            .ok_or_else(|| {
                HostError::type_error(format!(
                    "type() argument 3 must be dict, not {}",
                    self.type_name_of(dict)
                ))
            })?;

        // The most derived metatype among the bases wins.
        let mut winner = metatype;
        for base in &base_list {
            if !self.is_type_object(*base) {
                return Err(HostError::type_error(
                    "Error when calling the metaclass bases: bases must be types",
                ));
            }
            let meta = self.type_of(*base);
            if self.is_subtype(winner, meta) {
                continue;
            }
            if self.is_subtype(meta, winner) {
                winner = meta;
                continue;
            }
            return Err(HostError::type_error(
                "metaclass conflict: the metaclass of a derived class must be a (non-strict) subclass of the metaclasses of all its bases",
            ));
        }
        if base_list.is_empty() {
            base_list.push(self.types.object);
        }

        let mut flags = TypeFlags::HEAPTYPE | TypeFlags::HAVE_CLASS | TypeFlags::BASETYPE;
        if base_list.iter().any(|b| self.is_subtype(*b, self.types.type_)) {
            flags |= TypeFlags::TYPE_SUBCLASS;
        }
        for base in &base_list {
            self.incref(*base);
        }
        let result = self.own(self.alloc(
            winner,
            Payload::Type(TypeData {
                name: name_text,
                bases: base_list,
                dict: Dict::new(),
                flags,
                slots: TypeSlots::default(),
            }),
        ));
        for (key, value) in entries {
            self.store_entry(result.get(), key, value)?;
        }
        let module_key = DictKey::Str("__module__".to_string());
        if self.type_lookup_own(result.get(), &module_key).is_none() {
            self.store_named(result.get(), "__module__", self.own(self.new_str("__builtin__")?).get())?;
        }
        Ok(result.into_raw())
    }

    fn has_init(&self, ty: ObjRef) -> bool {
        self.find_slot(ty, |s| s.init.clone()).is_some()
    }

    fn call_init(&self, ty: ObjRef, obj: ObjRef, args: ObjRef) -> HostResult<()> {
        match self.find_slot(ty, |s| s.init.clone()) {
            Some(init) => {
                let result = init.call(self, &[obj, args])?;
                self.decref(result);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn get_attr(&self, obj: ObjRef, name: &str) -> HostResult<ObjRef> {
        enum Target {
            Module(ObjRef),
            Type(String, Vec<ObjRef>),
            Instance(Option<ObjRef>),
            Text,
            File,
            Other,
        }
        let key = DictKey::Str(name.to_string());
        let target = self
            .with_payload(obj, |payload| match payload {
                Payload::Module(data) => Target::Module(data.dict),
                Payload::Type(data) => Target::Type(data.name.clone(), data.bases.clone()),
                Payload::Instance(d) => Target::Instance(d.get(&key)),
                Payload::Bytes(_) | Payload::Unicode(_) => Target::Text,
                Payload::File(_) => Target::File,
                _ => Target::Other,
            })
            .unwrap_or(Target::Other);

        let found = match target {
            Target::Module(dict) => self.dict_get(dict, &key),
            Target::Type(type_name, bases) => match name {
                "__name__" => return self.new_str(&type_name),
                "__bases__" => return self.new_tuple(&bases),
                _ => self.type_lookup(obj, &key),
            },
            Target::Instance(own) => match name {
                "__class__" => Some(self.type_of(obj)),
                _ => own.or_else(|| self.type_lookup(self.type_of(obj), &key)),
            },
            Target::Text => {
                return match builtins::text_method(name) {
                    Some(method) => Ok(self.bound_method(obj, method)),
                    None => Err(self.missing_attribute(obj, name)),
                };
            }
            Target::File => {
                if name == "softspace" {
                    let flag = self
                        .with_payload(obj, |p| matches!(p, Payload::File(f) if f.softspace))
                        .unwrap_or(false);
                    return self.new_int(flag as i64);
                }
                if name == "name" {
                    let file_name = self
                        .with_payload(obj, |p| match p {
                            Payload::File(f) => f.name.clone(),
                            _ => String::new(),
                        })
                        .unwrap_or_default();
                    return self.new_str(&file_name);
                }
                return match builtins::file_method(name) {
                    Some(method) => Ok(self.bound_method(obj, method)),
                    None => Err(self.missing_attribute(obj, name)),
                };
            }
            Target::Other => None,
        };
        match found {
            Some(value) => {
                self.incref(value);
                Ok(value)
            }
            None => Err(self.missing_attribute(obj, name)),
        }
    }

    fn get_attr_obj(&self, obj: ObjRef, name: ObjRef) -> HostResult<ObjRef> {
        let text = self.attribute_name(name)?;
        self.get_attr(obj, &text)
    }

    fn set_attr(&self, obj: ObjRef, name: &str, value: ObjRef) -> HostResult<()> {
        enum Target {
            Dict(ObjRef),
            Inline,
            BuiltinType(String),
            Other,
        }
        let target = self
            .with_payload(obj, |payload| match payload {
                Payload::Module(data) => Target::Dict(data.dict),
                Payload::Instance(_) => Target::Inline,
                Payload::Type(data) if data.flags.contains(TypeFlags::HEAPTYPE) => Target::Inline,
                Payload::Type(data) => Target::BuiltinType(data.name.clone()),
                _ => Target::Other,
            })
            .unwrap_or(Target::Other);
        match target {
            Target::Dict(dict) => self.store_named(dict, name, value),
            Target::Inline => self.store_named(obj, name, value),
            Target::BuiltinType(type_name) => Err(HostError::type_error(format!(
                "can't set attributes of built-in/extension type '{type_name}'"
            ))),
            Target::Other => Err(self.missing_attribute(obj, name)),
        }
    }

    fn set_attr_obj(&self, obj: ObjRef, name: ObjRef, value: ObjRef) -> HostResult<()> {
        let text = self.attribute_name(name)?;
        self.set_attr(obj, &text, value)
    }

    fn get_item(&self, obj: ObjRef, key: ObjRef) -> HostResult<ObjRef> {
        enum Target {
            Dict,
            Sequence(&'static str, Vec<ObjRef>),
            Other,
        }
        let target = self
            .with_payload(obj, |payload| match payload {
                Payload::Dict(_) => Target::Dict,
                Payload::List(items) => Target::Sequence("list", items.clone()),
                Payload::Tuple(items) => Target::Sequence("tuple", items.clone()),
                _ => Target::Other,
            })
            .unwrap_or(Target::Other);
        let found = match target {
            Target::Dict => {
                let id = self.dict_key(key)?;
                match self.dict_get(obj, &id) {
                    Some(found) => found,
                    None => return Err(HostError::key(self.render(key, true)?)),
                }
            }
            Target::Sequence(kind, items) => {
                let index = self.as_i64(key).map_err(|_| {
                    HostError::type_error(format!("{kind} indices must be integers, not {}", self.type_name_of(key)))
                })?;
                match index_into(items.len(), index) {
                    Some(position) => items[position],
                    None => {
                        return Err(HostError::new(
                            ExceptionKind::Index,
                            format!("{kind} index out of range"),
                        ));
                    }
                }
            }
            Target::Other => {
                return Err(HostError::type_error(format!(
                    "'{}' object has no attribute '__getitem__'",
                    self.type_name_of(obj)
                )));
            }
        };
        self.incref(found);
        Ok(found)
    }

    fn set_item(&self, obj: ObjRef, key: ObjRef, value: ObjRef) -> HostResult<()> {
        let is_dict = self.with_payload(obj, |p| matches!(p, Payload::Dict(_)));
        let is_list = self.with_payload(obj, |p| matches!(p, Payload::List(_)));
        if is_dict == Some(true) {
            return self.store_entry(obj, key, value);
        }
        if is_list == Some(true) {
            let index = self.as_i64(key)?;
            self.incref(value);
            let replaced = self
                .with_payload_mut(obj, |payload| match payload {
                    Payload::List(items) => index_into(items.len(), index)
                        .map(|position| std::mem::replace(&mut items[position], value)),
                    _ => None,
                })
                .flatten();
            return match replaced {
                Some(old) => {
                    self.decref(old);
                    Ok(())
                }
                None => {
                    self.decref(value);
                    Err(HostError::new(
                        ExceptionKind::Index,
                        "list assignment index out of range",
                    ))
                }
            };
        }
        Err(HostError::type_error(format!(
            "'{}' object does not support item assignment",
            self.type_name_of(obj)
        )))
    }

    fn contains(&self, mapping: ObjRef, key: ObjRef) -> HostResult<bool> {
        let is_dict = self.with_payload(mapping, |p| matches!(p, Payload::Dict(_)));
        if is_dict == Some(true) {
            let id = self.dict_key(key)?;
            return Ok(self.dict_get(mapping, &id).is_some());
        }
        match self.sequence_items(mapping) {
            Some(items) => Ok(items.iter().any(|item| self.objects_equal(*item, key))),
            None => Err(HostError::type_error(format!(
                "argument of type '{}' is not iterable",
                self.type_name_of(mapping)
            ))),
        }
    }

    fn call(&self, callable: ObjRef, args: &[ObjRef]) -> HostResult<ObjRef> {
        enum Callee {
            Native(NativeFn),
            Method(ObjRef, NativeFn),
            Type,
            Other,
        }
        let callee = self
            .with_payload(callable, |payload| match payload {
                Payload::Builtin(f) => Callee::Native(f.clone()),
                Payload::BoundMethod(m) => Callee::Method(m.receiver, m.function.clone()),
                Payload::Type(_) => Callee::Type,
                _ => Callee::Other,
            })
            .unwrap_or(Callee::Other);
        match callee {
            Callee::Native(function) => function.call(self, args),
            Callee::Method(receiver, function) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver);
                full.extend_from_slice(args);
                function.call(self, &full)
            }
            Callee::Type => self.call_type(callable, args),
            Callee::Other => Err(HostError::type_error(format!(
                "'{}' object is not callable",
                self.type_name_of(callable)
            ))),
        }
    }

    fn iter(&self, obj: ObjRef) -> HostResult<ObjRef> {
        enum Source {
            Items(Vec<ObjRef>),
            Itself,
            Other,
        }
        let source = self
            .with_payload(obj, |payload| match payload {
                Payload::List(items) | Payload::Tuple(items) => Source::Items(items.clone()),
                Payload::Dict(d) => Source::Items(d.keys().collect()),
                Payload::Iter(_) => Source::Itself,
                _ => Source::Other,
            })
            .unwrap_or(Source::Other);
        match source {
            Source::Items(items) => {
                for item in &items {
                    self.incref(*item);
                }
                Ok(self.alloc(
                    self.types.iterator,
                    Payload::Iter(IterData { items, position: 0 }),
                ))
            }
            Source::Itself => {
                self.incref(obj);
                Ok(obj)
            }
            Source::Other => Err(HostError::type_error(format!(
                "'{}' object is not iterable",
                self.type_name_of(obj)
            ))),
        }
    }

    fn iter_next(&self, iter: ObjRef) -> HostResult<Option<ObjRef>> {
        let step = self.with_payload_mut(iter, |payload| match payload {
            Payload::Iter(data) => {
                let next = data.items.get(data.position).copied();
                if next.is_some() {
                    data.position += 1;
                }
                Some(next)
            }
            _ => None,
        });
        match step.flatten() {
            Some(next) => {
                if let Some(item) = next {
                    self.incref(item);
                }
                Ok(next)
            }
            None => Err(HostError::type_error(format!(
                "'{}' object is not an iterator",
                self.type_name_of(iter)
            ))),
        }
    }

    fn lookup_builtin(&self, name: &str) -> Option<ObjRef> {
        let dict = self.module_dict_ref(self.builtins).ok()?;
        let found = self.dict_get(dict, &DictKey::Str(name.to_string()))?;
        self.incref(found);
        Some(found)
    }

    fn sys_object(&self, name: &str) -> Option<ObjRef> {
        let dict = self.module_dict_ref(self.sys).ok()?;
        self.dict_get(dict, &DictKey::Str(name.to_string()))
    }

    fn import_module(&self, name: &str, fromlist: Option<ObjRef>) -> HostResult<ObjRef> {
        self.import_dotted(name, fromlist)
    }

    fn module_dict(&self, module: ObjRef) -> HostResult<ObjRef> {
        let dict = self.module_dict_ref(module)?;
        self.incref(dict);
        Ok(dict)
    }

    fn to_str(&self, obj: ObjRef) -> HostResult<ObjRef> {
        let is_bytes = self.with_payload(obj, |p| matches!(p, Payload::Bytes(_)));
        if is_bytes == Some(true) {
            self.incref(obj);
            return Ok(obj);
        }
        let text = self.render(obj, false)?;
        self.new_str(&text)
    }

    fn soft_space(&self, file: ObjRef, new: bool) -> bool {
        self.with_payload_mut(file, |payload| match payload {
            Payload::File(data) => std::mem::replace(&mut data.softspace, new),
            _ => false,
        })
        .unwrap_or(false)
    }

    fn write_str(&self, file: ObjRef, text: &str) -> HostResult<()> {
        self.append_to_file(file, text.as_bytes())
    }

    fn write_object(&self, file: ObjRef, obj: ObjRef, raw: bool) -> HostResult<()> {
        let direct = self
            .with_payload(obj, |payload| match payload {
                Payload::Bytes(b) if raw => Some(b.clone()),
                Payload::Unicode(s) if raw => Some(s.as_bytes().to_vec()),
                _ => None,
            })
            .flatten();
        let data = match direct {
            Some(data) => data,
            None => self.render(obj, !raw)?.into_bytes(),
        };
        self.append_to_file(file, &data)
    }

    fn thread_state(&self) -> ThreadState {
        MAIN_THREAD
    }

    fn new_code(&self, spec: &CodeSpec) -> HostResult<ObjRef> {
        let body_ok = matches!(
            self.with_payload(spec.code, |p| matches!(p, Payload::Buffer(_) | Payload::Bytes(_))),
            Some(true)
        );
        if !body_ok || !self.is_text(spec.filename) || !self.is_text(spec.name) {
            return Err(HostError::new(
                ExceptionKind::System,
                "bad argument to internal function",
            ));
        }
        let refs = [
            spec.code,
            spec.consts,
            spec.names,
            spec.varnames,
            spec.freevars,
            spec.cellvars,
            spec.filename,
            spec.name,
            spec.lnotab,
        ];
        for r in refs {
            self.incref(r);
        }
        Ok(self.alloc(
            self.types.code,
            Payload::Code(CodeData {
                arg_count: spec.arg_count,
                local_count: spec.local_count,
                stack_size: spec.stack_size,
                flags: spec.flags,
                code: spec.code,
                consts: spec.consts,
                names: spec.names,
                varnames: spec.varnames,
                freevars: spec.freevars,
                cellvars: spec.cellvars,
                filename: spec.filename,
                name: spec.name,
                first_line: spec.first_line,
                lnotab: spec.lnotab,
            }),
        ))
    }

    fn new_frame(
        &self,
        thread: ThreadState,
        code: ObjRef,
        globals: ObjRef,
        locals: Option<ObjRef>,
    ) -> HostResult<ObjRef> {
        let first_line = self
            .with_payload(code, |payload| match payload {
                Payload::Code(data) => Some(data.first_line),
                _ => None,
            })
            .flatten();
        let globals_ok = self.with_payload(globals, |p| matches!(p, Payload::Dict(_)));
        let Some(first_line) = first_line.filter(|_| globals_ok == Some(true)) else {
            return Err(HostError::new(
                ExceptionKind::System,
                "bad argument to internal function",
            ));
        };
        self.incref(code);
        self.incref(globals);
        if let Some(locals) = locals {
            self.incref(locals);
        }
        Ok(self.alloc(
            self.types.frame,
            Payload::Frame(FrameData {
                thread,
                code,
                globals,
                locals,
                line: first_line,
            }),
        ))
    }

    fn set_frame_line(&self, frame: ObjRef, line: u32) -> HostResult<()> {
        self.with_payload_mut(frame, |payload| match payload {
            Payload::Frame(data) => {
                data.line = line;
                true
            }
            _ => false,
        })
        .filter(|set| *set)
        .map(|_| ())
        .ok_or_else(|| HostError::new(ExceptionKind::System, "bad argument to internal function"))
    }

    fn current_line(&self) -> u32 {
        self.line.get()
    }

    fn set_current_line(&self, line: u32) {
        self.line.set(line);
    }
}

impl ReferenceHost {
    fn missing_attribute(&self, obj: ObjRef, name: &str) -> HostError {
        let message = if self.is_type_object(obj) {
            format!("type object '{}' has no attribute '{name}'", self.type_name(obj))
        } else {
            format!("'{}' object has no attribute '{name}'", self.type_name_of(obj))
        };
        HostError::attribute(message)
    }

    fn attribute_name(&self, name: ObjRef) -> HostResult<String> {
        self.text_contents(name).ok_or_else(|| {
            HostError::type_error(format!(
                "attribute name must be string, not '{}'",
                self.type_name_of(name)
            ))
        })
    }

    /// Borrowed entry in the type's own dict (no MRO walk).
    fn type_lookup_own(&self, ty: ObjRef, key: &DictKey) -> Option<ObjRef> {
        self.with_payload(ty, |payload| match payload {
            Payload::Type(data) => data.dict.get(key),
            _ => None,
        })
        .flatten()
    }
}
