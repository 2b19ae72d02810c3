//! Built-in call dispatch.
//!
//! A [`CachedBuiltin`] resolves a named host built-in once and keeps the
//! callable for the life of the [`Shim`]. Call arguments are written **last
//! parameter first**, the order compiled code evaluates them in; the
//! dispatcher reverses them into positional order. Unset tail arguments are
//! simply left out, selecting the shorter overload of the built-in.

use std::cell::OnceCell;

use shimrt_core::{Host, ObjRef, Owned};

use crate::error::{ShimError, ShimResult};
use crate::runtime::Shim;

/// A host built-in resolved by name on first use.
pub struct CachedBuiltin<'h, H: Host> {
    name: &'static str,
    handle: OnceCell<Owned<'h, H>>,
}

impl<'h, H: Host> CachedBuiltin<'h, H> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_resolved(&self) -> bool {
        self.handle.get().is_some()
    }

    /// The cached callable (borrowed), resolving it if needed.
    ///
    /// # Errors
    ///
    /// [`ShimError::Internal`] when the host has no such built-in.
    pub fn resolve(&self, host: &'h H) -> ShimResult<ObjRef> {
        if let Some(handle) = self.handle.get() {
            return Ok(handle.get());
        }
        let Some(callable) = host.lookup_builtin(self.name) else {
            tracing::error!(target: "shimrt::dispatch", builtin = self.name, "built-in could not be resolved");
            return Err(ShimError::Internal(format!(
                "failed to resolve built-in '{}'",
                self.name
            )));
        };
        tracing::debug!(target: "shimrt::dispatch", builtin = self.name, "resolved built-in");
        Ok(self.handle.get_or_init(|| host.own(callable)).get())
    }

    /// Call with arguments given last parameter first.
    pub fn call(&self, host: &'h H, reversed_args: &[ObjRef]) -> ShimResult<Owned<'h, H>> {
        let callable = self.resolve(host)?;
        let args: Vec<ObjRef> = reversed_args.iter().rev().copied().collect();
        Ok(host.own(host.call(callable, &args)?))
    }
}

impl<'h, H: Host> Shim<'h, H> {
    /// `open([file_name[, mode[, buffering]]])`.
    ///
    /// A `None` argument drops it and every argument after it.
    pub fn open_file(
        &self,
        file_name: Option<ObjRef>,
        mode: Option<ObjRef>,
        buffering: Option<ObjRef>,
    ) -> ShimResult<Owned<'h, H>> {
        let mut reversed: Vec<ObjRef> = [file_name, mode, buffering]
            .into_iter()
            .map_while(|arg| arg)
            .collect();
        reversed.reverse();
        self.builtins.open.call(self.host(), &reversed)
    }

    /// `compile(source, file_name, mode, flags, dont_inherit=True)`.
    ///
    /// A code object passes through unchanged. Text compiled in a mode other
    /// than `exec` is stripped first, since leading whitespace is an error
    /// there; a file compiled in `exec` mode is read first.
    pub fn compile_code(
        &self,
        source: ObjRef,
        file_name: ObjRef,
        mode: ObjRef,
        flags: i64,
    ) -> ShimResult<Owned<'h, H>> {
        let host = self.host();
        if host.is_code(source) {
            return Ok(Owned::borrowed(host, source));
        }

        let exec = host.text_contents(mode).is_some_and(|m| m == "exec");
        let source = if host.is_text(source) && !exec {
            call_method(host, source, "strip")?
        } else if host.is_file(source) && exec {
            call_method(host, source, "read")?
        } else {
            Owned::borrowed(host, source)
        };

        let flags = host.own(host.new_int(flags)?);
        self.builtins.compile.call(
            host,
            &[host.true_object(), flags.get(), mode, file_name, source.get()],
        )
    }
}

fn call_method<'h, H: Host>(host: &'h H, obj: ObjRef, name: &str) -> ShimResult<Owned<'h, H>> {
    let method = host.own(host.get_attr(obj, name)?);
    Ok(host.own(host.call(method.get(), &[])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shimrt_core::ExceptionKind;
    use shimrt_host::ReferenceHost;

    #[test]
    fn test_builtin_resolved_once() {
        let host = ReferenceHost::new();
        let len = CachedBuiltin::new("len");
        assert!(!len.is_resolved());

        let first = len.resolve(&host).unwrap();
        let count = host.ref_count(first);
        assert_eq!(len.resolve(&host).unwrap(), first);
        assert_eq!(host.ref_count(first), count);
        assert_eq!(len.name(), "len");
    }

    #[test]
    fn test_unknown_builtin_is_fatal() {
        let host = ReferenceHost::new();
        let missing = CachedBuiltin::new("no_such_builtin");
        let err = missing.call(&host, &[]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_call_errors_propagate() {
        let host = ReferenceHost::new();
        let len = CachedBuiltin::new("len");
        let number = host.own(host.new_int(3).unwrap());
        let err = len.call(&host, &[number.get()]).unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::Type);
        assert_eq!(err.message(), "object of type 'int' has no len()");
    }

    #[test]
    fn test_open_without_arguments() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let err = shim.open_file(None, None, None).unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::Type);

        // A missing mode also drops buffering.
        let name = host.own(host.new_str("/nonexistent/shimrt").unwrap());
        let buffering = host.own(host.new_str("not a number").unwrap());
        let err = shim
            .open_file(Some(name.get()), None, Some(buffering.get()))
            .unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::Io);
    }

    #[test]
    fn test_open_in_argument_order() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let name = host.own(host.new_str("out.txt").unwrap());
        let mode = host.own(host.new_str("w").unwrap());
        let buffering = host.own(host.new_int(0).unwrap());
        let file = shim
            .open_file(Some(name.get()), Some(mode.get()), Some(buffering.get()))
            .unwrap();
        assert!(host.is_file(file.get()));
        let file_name = host.own(host.get_attr(file.get(), "name").unwrap());
        assert_eq!(host.text_contents(file_name.get()).as_deref(), Some("out.txt"));
    }

    #[test]
    fn test_compile_strips_non_exec_source() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let source = host.own(host.new_str("   1 + 2\n").unwrap());
        let file_name = host.own(host.new_str("<string>").unwrap());
        let mode = host.own(host.new_str("eval").unwrap());

        let code = shim
            .compile_code(source.get(), file_name.get(), mode.get(), 0)
            .unwrap();
        assert!(host.is_code(code.get()));

        // Compiling a code object returns it.
        let again = shim
            .compile_code(code.get(), file_name.get(), mode.get(), 0)
            .unwrap();
        assert_eq!(again, code.get());
    }

    #[test]
    fn test_compile_reads_files_in_exec_mode() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let file = host.own(host.new_file("script.py", "w+"));
        host.write_str(file.get(), "x = 1\n").unwrap();
        let file_name = host.own(host.new_str("script.py").unwrap());
        let mode = host.own(host.new_str("exec").unwrap());

        let code = shim
            .compile_code(file.get(), file_name.get(), mode.get(), 0)
            .unwrap();
        assert!(host.is_code(code.get()));
    }

    #[test]
    fn test_compile_leaves_no_temporaries() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        shim.builtins.compile.resolve(&host).unwrap();
        let source = host.own(host.new_str("1").unwrap());
        let file_name = host.own(host.new_str("<string>").unwrap());
        let bad_mode = host.own(host.new_str("bogus").unwrap());

        let baseline = host.live_objects();
        let err = shim
            .compile_code(source.get(), file_name.get(), bad_mode.get(), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::Value);
        assert_eq!(host.live_objects(), baseline);
    }
}
