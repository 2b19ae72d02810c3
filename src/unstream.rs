//! Constant unstreaming.
//!
//! Constants too complex to build in code are embedded as serialized byte
//! buffers and loaded at startup through the host serialization module. The
//! buffers come from the same toolchain, so any failure here is an internal
//! inconsistency rather than a user error.

use shimrt_core::{Host, ObjRef, Owned};

use crate::error::{ShimError, ShimResult};
use crate::runtime::Shim;

impl<'h, H: Host> Shim<'h, H> {
    /// Resolve the configured load function. Later calls do nothing.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn unstream_init(&self) -> ShimResult<()> {
        if self.unstream_loads.get().is_some() {
            return Ok(());
        }
        let config = self.config();
        let loads = self.resolve_loader().map_err(|err| {
            tracing::error!(
                target: "shimrt::unstream",
                module = %config.unstream_module,
                function = %config.unstream_function,
                error = %err,
                "cannot resolve constant loader"
            );
            ShimError::Internal(format!(
                "cannot resolve {}.{}: {err}",
                config.unstream_module, config.unstream_function
            ))
        })?;
        self.unstream_loads.get_or_init(|| loads);
        tracing::debug!(target: "shimrt::unstream", module = %config.unstream_module, "constant loader ready");
        Ok(())
    }

    fn resolve_loader(&self) -> ShimResult<Owned<'h, H>> {
        let host = self.host();
        let module_name = &self.config().unstream_module;
        let module = self.import_module(module_name, module_name, None)?;
        Ok(host.own(host.get_attr(module.get(), &self.config().unstream_function)?))
    }

    fn unstream_loader(&self) -> ShimResult<ObjRef> {
        self.unstream_loads
            .get()
            .map(Owned::get)
            .ok_or_else(|| ShimError::Internal("constant loader used before initialisation".to_string()))
    }

    /// Deserialize one embedded constant.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn unstream_constant(&self, buffer: &[u8]) -> ShimResult<Owned<'h, H>> {
        let host = self.host();
        let loads = self.unstream_loader()?;
        let load = || -> ShimResult<Owned<'h, H>> {
            let data = host.own(host.new_bytes(buffer)?);
            Ok(host.own(host.call(loads, &[data.get()])?))
        };
        load().map_err(|err| {
            tracing::error!(target: "shimrt::unstream", size = buffer.len(), error = %err, "corrupt embedded constant");
            ShimError::Internal(format!("cannot unstream {}-byte constant: {err}", buffer.len()))
        })
    }
}
