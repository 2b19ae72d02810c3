//! Module import and `from module import *`.

use shimrt_core::{ExceptionKind, Host, ObjRef, Owned};

use crate::error::{ShimError, ShimResult};
use crate::runtime::Shim;

/// Registry of modules compiled into the executable.
///
/// Consulted before the host import mechanism, and only for modules not yet
/// present in `sys.modules`, so a module whose import is still in progress is
/// never loaded twice.
pub trait EmbeddedModules<H: Host> {
    /// Load `name` into `sys.modules` if it is embedded.
    ///
    /// Returns `Ok(false)` when the registry does not know the module.
    fn find_and_load(&self, host: &H, name: &str) -> ShimResult<bool>;
}

impl<H, F> EmbeddedModules<H> for F
where
    H: Host,
    F: Fn(&H, &str) -> ShimResult<bool>,
{
    fn find_and_load(&self, host: &H, name: &str) -> ShimResult<bool> {
        self(host, name)
    }
}

/// Where `import_module_star` binds the names it copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarTarget {
    /// A module or class: names are set as attributes.
    Attributes(ObjRef),
    /// A plain mapping such as a locals dictionary: names are set as items.
    Mapping(ObjRef),
}

impl<'h, H: Host> Shim<'h, H> {
    /// Import `module_name` and return `sys.modules[import_name]`.
    ///
    /// The two names differ for submodule imports, where the host import
    /// returns the top-level package. The current source line survives the
    /// import.
    pub fn import_module(
        &self,
        module_name: &str,
        import_name: &str,
        import_items: Option<ObjRef>,
    ) -> ShimResult<Owned<'h, H>> {
        let host = self.host();

        if let Some(embedded) = &self.embedded {
            let key = host.own(host.new_str(module_name)?);
            if !host.contains(sys_modules(host)?, key.get())?
                && embedded.find_and_load(host, module_name)?
            {
                tracing::debug!(target: "shimrt::import", module = module_name, "loaded embedded module");
                return lookup_module(host, import_name);
            }
        }

        let line = host.current_line();
        let imported = host.import_module(module_name, import_items);
        host.set_current_line(line);
        drop(host.own(imported?));

        lookup_module(host, import_name)
    }

    /// `from module_name import *` into `target`.
    ///
    /// With an `__all__` export list exactly those names are copied, in
    /// order. Otherwise every namespace entry not starting with an
    /// underscore is.
    pub fn import_module_star(&self, target: StarTarget, module_name: &str) -> ShimResult<()> {
        let host = self.host();
        let module = self.import_module(module_name, module_name, None)?;

        let (names, export_list) = match host.get_attr(module.get(), "__all__") {
            Ok(all) => (host.own(all), true),
            Err(err) if err.is(ExceptionKind::Attribute) => {
                (host.own(host.module_dict(module.get())?), false)
            }
            Err(err) => return Err(err.into()),
        };
        tracing::trace!(target: "shimrt::import", module = module_name, export_list, "star import");

        let iter = host.own(host.iter(names.get())?);
        while let Some(name) = host.iter_next(iter.get())? {
            let name = host.own(name);
            if !export_list
                && host
                    .text_contents(name.get())
                    .is_some_and(|text| text.starts_with('_'))
            {
                continue;
            }
            let value = host.own(host.get_attr_obj(module.get(), name.get())?);
            match target {
                StarTarget::Attributes(obj) => host.set_attr_obj(obj, name.get(), value.get())?,
                StarTarget::Mapping(mapping) => host.set_item(mapping, name.get(), value.get())?,
            }
        }
        Ok(())
    }
}

fn sys_modules<H: Host>(host: &H) -> ShimResult<ObjRef> {
    host.sys_object("modules")
        .ok_or_else(|| ShimError::Lookup("lost sys.modules".to_string()))
}

fn lookup_module<'h, H: Host>(host: &'h H, import_name: &str) -> ShimResult<Owned<'h, H>> {
    let modules = sys_modules(host)?;
    let key = host.own(host.new_str(import_name)?);
    Ok(host.own(host.get_item(modules, key.get())?))
}
