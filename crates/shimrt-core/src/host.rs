//! The host runtime contract.

use crate::{CodeSpec, HostResult, ObjRef, Owned, TextProbe, ThreadState, TypeFlags};

/// Operations the shim layer needs from the managed-object runtime.
///
/// ## Ownership
///
/// Unless a method says "borrowed", an `ObjRef` it returns is a new
/// reference that the caller must release (usually by wrapping it with
/// [`Host::own`]). `ObjRef` arguments are always borrowed: the host takes its
/// own reference if it retains them.
///
/// ## Threading
///
/// Every method is called from the thread holding the host's execution
/// context. Implementations use interior mutability and need not be `Sync`.
pub trait Host {
    // =========================================================================
    // Reference counting
    // =========================================================================

    /// Add one reference.
    fn incref(&self, obj: ObjRef);

    /// Release one reference, freeing the object when it reaches zero.
    fn decref(&self, obj: ObjRef);

    /// Wrap a new reference in a scoped guard.
    fn own(&self, obj: ObjRef) -> Owned<'_, Self>
    where
        Self: Sized,
    {
        Owned::new(self, obj)
    }

    // =========================================================================
    // Singletons (borrowed)
    // =========================================================================

    fn none(&self) -> ObjRef;
    fn true_object(&self) -> ObjRef;
    fn empty_tuple(&self) -> ObjRef;
    fn empty_str(&self) -> ObjRef;

    /// The base metatype (`type`).
    fn type_type(&self) -> ObjRef;

    // =========================================================================
    // Construction
    // =========================================================================

    fn new_int(&self, value: i64) -> HostResult<ObjRef>;

    /// A plain byte string holding `text` encoded as UTF-8.
    fn new_str(&self, text: &str) -> HostResult<ObjRef>;

    fn new_bytes(&self, data: &[u8]) -> HostResult<ObjRef>;

    fn new_tuple(&self, items: &[ObjRef]) -> HostResult<ObjRef>;

    fn new_list(&self) -> HostResult<ObjRef>;

    fn list_append(&self, list: ObjRef, item: ObjRef) -> HostResult<()>;

    /// An immutable byte buffer, as used for code bodies.
    fn new_buffer(&self, data: &[u8]) -> HostResult<ObjRef>;

    // =========================================================================
    // Introspection
    // =========================================================================

    /// The runtime type of `obj` (borrowed).
    fn type_of(&self, obj: ObjRef) -> ObjRef;

    /// The display name of a type object.
    fn type_name(&self, ty: ObjRef) -> String;

    /// The display name of the runtime type of `obj`.
    fn type_name_of(&self, obj: ObjRef) -> String {
        self.type_name(self.type_of(obj))
    }

    /// Whether `obj` already has an integral representation.
    fn is_integral(&self, obj: ObjRef) -> bool;

    /// Run the object's integer-conversion capability.
    ///
    /// Returns `None` when the object's type has no such capability.
    fn integer_slot(&self, obj: ObjRef) -> Option<HostResult<ObjRef>>;

    /// Read an integral object as a machine integer.
    ///
    /// Fails (typically with an overflow error) when the value does not fit.
    fn as_i64(&self, obj: ObjRef) -> HostResult<i64>;

    /// Probe for one of the single-character text/byte representations.
    fn text_probe(&self, obj: ObjRef) -> Option<TextProbe>;

    /// Contents of a text object (byte string decoded lossily, or unicode).
    fn text_contents(&self, obj: ObjRef) -> Option<String>;

    /// Byte string or unicode text.
    fn is_text(&self, obj: ObjRef) -> bool;

    fn is_code(&self, obj: ObjRef) -> bool;

    fn is_file(&self, obj: ObjRef) -> bool;

    /// The size protocol.
    fn size(&self, obj: ObjRef) -> HostResult<usize>;

    // =========================================================================
    // Types
    // =========================================================================

    fn type_flags(&self, ty: ObjRef) -> TypeFlags;

    fn is_subtype(&self, ty: ObjRef, base: ObjRef) -> bool;

    /// The raw allocator of `metatype`, called with a `(name, bases, dict)` tuple.
    fn type_new(&self, metatype: ObjRef, args: ObjRef) -> HostResult<ObjRef>;

    /// Whether the type object `ty` exposes an initializer.
    fn has_init(&self, ty: ObjRef) -> bool;

    /// Run the initializer of `ty` on `obj`.
    fn call_init(&self, ty: ObjRef, obj: ObjRef, args: ObjRef) -> HostResult<()>;

    // =========================================================================
    // Attributes and items
    // =========================================================================

    fn get_attr(&self, obj: ObjRef, name: &str) -> HostResult<ObjRef>;

    fn get_attr_obj(&self, obj: ObjRef, name: ObjRef) -> HostResult<ObjRef>;

    fn set_attr(&self, obj: ObjRef, name: &str, value: ObjRef) -> HostResult<()>;

    fn set_attr_obj(&self, obj: ObjRef, name: ObjRef, value: ObjRef) -> HostResult<()>;

    fn get_item(&self, obj: ObjRef, key: ObjRef) -> HostResult<ObjRef>;

    fn set_item(&self, obj: ObjRef, key: ObjRef, value: ObjRef) -> HostResult<()>;

    fn contains(&self, mapping: ObjRef, key: ObjRef) -> HostResult<bool>;

    // =========================================================================
    // Calls and iteration
    // =========================================================================

    /// Call with positional arguments.
    fn call(&self, callable: ObjRef, args: &[ObjRef]) -> HostResult<ObjRef>;

    fn iter(&self, obj: ObjRef) -> HostResult<ObjRef>;

    /// `Ok(None)` when the iterator is exhausted.
    fn iter_next(&self, iter: ObjRef) -> HostResult<Option<ObjRef>>;

    // =========================================================================
    // Environment
    // =========================================================================

    /// Resolve a named built-in.
    fn lookup_builtin(&self, name: &str) -> Option<ObjRef>;

    /// A `sys` attribute such as `modules` or `stdout` (borrowed).
    fn sys_object(&self, name: &str) -> Option<ObjRef>;

    /// The host import mechanism.
    ///
    /// Without `fromlist` a dotted import returns the top-level package.
    fn import_module(&self, name: &str, fromlist: Option<ObjRef>) -> HostResult<ObjRef>;

    /// The attribute namespace of a module.
    fn module_dict(&self, module: ObjRef) -> HostResult<ObjRef>;

    // =========================================================================
    // Output
    // =========================================================================

    /// String conversion.
    fn to_str(&self, obj: ObjRef) -> HostResult<ObjRef>;

    /// Set the softspace flag of `file` to `new`, returning the previous value.
    fn soft_space(&self, file: ObjRef, new: bool) -> bool;

    fn write_str(&self, file: ObjRef, text: &str) -> HostResult<()>;

    fn write_object(&self, file: ObjRef, obj: ObjRef, raw: bool) -> HostResult<()>;

    // =========================================================================
    // Frames and line tracking
    // =========================================================================

    fn thread_state(&self) -> ThreadState;

    fn new_code(&self, spec: &CodeSpec) -> HostResult<ObjRef>;

    fn new_frame(
        &self,
        thread: ThreadState,
        code: ObjRef,
        globals: ObjRef,
        locals: Option<ObjRef>,
    ) -> HostResult<ObjRef>;

    fn set_frame_line(&self, frame: ObjRef, line: u32) -> HostResult<()>;

    /// The source line used for traceback construction.
    fn current_line(&self) -> u32;

    fn set_current_line(&self, line: u32);
}
