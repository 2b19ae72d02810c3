//! Placeholder code and frame records for tracebacks.
//!
//! Compiled functions have no bytecode, but the host's traceback machinery
//! walks frame records. These helpers synthesize just enough of one: a code
//! record with zero counts and an empty body, and a frame bound to the
//! module's namespace.

use shimrt_core::{CodeSpec, Host, ObjRef, Owned};

use crate::error::ShimResult;
use crate::runtime::Shim;

impl<'h, H: Host> Shim<'h, H> {
    /// The shared empty body of synthesized code records (borrowed).
    pub(crate) fn empty_code_body(&self) -> ShimResult<ObjRef> {
        if let Some(body) = self.empty_body.get() {
            return Ok(body.get());
        }
        let host = self.host();
        let body = host.own(host.new_buffer(&[])?);
        Ok(self.empty_body.get_or_init(|| body).get())
    }

    /// A code record naming `function_name` in `filename` at `line`.
    pub fn make_code(
        &self,
        filename: ObjRef,
        function_name: ObjRef,
        line: u32,
    ) -> ShimResult<Owned<'h, H>> {
        let host = self.host();
        let empty = host.empty_tuple();
        let spec = CodeSpec {
            arg_count: 0,
            local_count: 0,
            stack_size: 0,
            flags: 0,
            code: self.empty_code_body()?,
            consts: empty,
            names: empty,
            varnames: empty,
            freevars: empty,
            cellvars: empty,
            filename,
            name: function_name,
            first_line: line,
            lnotab: host.empty_str(),
        };
        Ok(host.own(host.new_code(&spec)?))
    }

    /// A frame record for `function_name` executing at `line` of `module`.
    ///
    /// The frame uses the module's namespace as globals and has no locals.
    pub fn make_frame(
        &self,
        module: ObjRef,
        filename: ObjRef,
        function_name: ObjRef,
        line: u32,
    ) -> ShimResult<Owned<'h, H>> {
        let host = self.host();
        let globals = host.own(host.module_dict(module)?);
        let code = self.make_code(filename, function_name, line)?;
        let frame = host.new_frame(host.thread_state(), code.get(), globals.get(), None);
        drop(code);
        let frame = host.own(frame?);
        host.set_frame_line(frame.get(), line)?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shimrt_core::ExceptionKind;
    use shimrt_host::ReferenceHost;

    type Guard<'h> = Owned<'h, ReferenceHost>;

    fn module_with_names(host: &ReferenceHost) -> (Guard<'_>, Guard<'_>, Guard<'_>) {
        (
            host.own(host.new_module("app").unwrap()),
            host.own(host.new_str("app.py").unwrap()),
            host.own(host.new_str("handler").unwrap()),
        )
    }

    #[test]
    fn test_code_record_is_empty_placeholder() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let (_, filename, function) = module_with_names(&host);

        let code = shim.make_code(filename.get(), function.get(), 17).unwrap();
        assert!(host.is_code(code.get()));
        assert_eq!(host.code_counts(code.get()), Some((0, 0, 0, 0)));
    }

    #[test]
    fn test_frame_points_at_line() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let (module, filename, function) = module_with_names(&host);

        let frame = shim
            .make_frame(module.get(), filename.get(), function.get(), 42)
            .unwrap();
        let info = host.frame_info(frame.get()).unwrap();
        assert_eq!(info.filename, "app.py");
        assert_eq!(info.function, "handler");
        assert_eq!(info.line, 42);
        assert_eq!(info.code_first_line, 42);
        assert_eq!(info.thread, host.thread_state());
        assert!(!info.has_locals);

        let globals = host.own(host.module_dict(module.get()).unwrap());
        assert_eq!(host.frame_globals(frame.get()), Some(globals.get()));
    }

    #[test]
    fn test_frame_holds_only_reference_to_code() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let (module, filename, function) = module_with_names(&host);

        let frame = shim
            .make_frame(module.get(), filename.get(), function.get(), 1)
            .unwrap();
        let code = host.frame_code(frame.get()).unwrap();
        assert_eq!(host.ref_count(code), Some(1));

        drop(frame);
        assert_eq!(host.ref_count(code), None);
    }

    #[test]
    fn test_empty_body_is_shared() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let first = shim.empty_code_body().unwrap();
        assert_eq!(shim.empty_code_body().unwrap(), first);
    }

    #[test]
    fn test_failures_leak_nothing() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        shim.initialize().unwrap();
        let (module, filename, function) = module_with_names(&host);
        let number = host.own(host.new_int(3).unwrap());

        let baseline = host.live_objects();
        let err = shim
            .make_frame(number.get(), filename.get(), function.get(), 1)
            .unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::Type);
        assert_eq!(host.live_objects(), baseline);

        // A malformed name fails in the code record, after globals were taken.
        let err = shim
            .make_frame(module.get(), filename.get(), number.get(), 1)
            .unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::System);
        assert_eq!(host.live_objects(), baseline);
    }
}
