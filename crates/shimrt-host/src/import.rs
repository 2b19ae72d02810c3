//! Module registry and the import machinery.

use std::sync::Arc;

use shimrt_core::{Host, HostError, HostResult, ObjRef, Owned};

use crate::ReferenceHost;
use crate::dict::DictKey;
use crate::object::{ModuleData, Payload};

/// Module initialiser: populates a freshly created module object.
pub type ModuleInit = Arc<dyn Fn(&ReferenceHost, ObjRef) -> HostResult<()> + Send + Sync>;

impl ReferenceHost {
    /// Register a module that `import` can create on demand.
    ///
    /// Dotted names register submodules; the parent package must be
    /// registered too.
    pub fn register_module<F>(&self, name: &str, init: F)
    where
        F: Fn(&ReferenceHost, ObjRef) -> HostResult<()> + Send + Sync + 'static,
    {
        self.registry
            .borrow_mut()
            .insert(name.to_string(), Arc::new(init));
    }

    /// A module object with `__name__` set (not registered in `sys.modules`).
    pub fn new_module(&self, name: &str) -> HostResult<ObjRef> {
        let dict = self.own(self.new_dict());
        self.incref(dict.get());
        let module = self.own(self.alloc(
            self.types.module,
            Payload::Module(ModuleData {
                name: name.to_string(),
                dict: dict.get(),
            }),
        ));
        let text = self.own(self.new_str(name)?);
        self.set_attr(module.get(), "__name__", text.get())?;
        Ok(module.into_raw())
    }

    pub(crate) fn import_dotted(&self, name: &str, fromlist: Option<ObjRef>) -> HostResult<ObjRef> {
        if name.is_empty() {
            return Err(HostError::value("Empty module name"));
        }
        let mut top = None;
        let mut parent: Option<Owned<'_, Self>> = None;
        let mut qualified = String::new();
        for part in name.split('.') {
            if !qualified.is_empty() {
                qualified.push('.');
            }
            qualified.push_str(part);
            let module = self.own(self.load_one(&qualified, part)?);
            if let Some(parent) = &parent {
                self.set_attr(parent.get(), part, module.get())?;
            }
            if top.is_none() {
                top = Some(module.clone());
            }
            parent = Some(module);
        }
        let (Some(top), Some(leaf)) = (top, parent) else {
            return Err(HostError::value("Empty module name"));
        };

        let Some(fromlist) = fromlist else {
            return Ok(top.into_raw());
        };
        for item in self.sequence_items(fromlist).unwrap_or_default() {
            let Some(item) = self.text_contents(item) else {
                continue;
            };
            if item == "*" || self.get_attr(leaf.get(), &item).map(|r| self.decref(r)).is_ok() {
                continue;
            }
            let submodule = format!("{qualified}.{item}");
            if self.registry.borrow().contains_key(&submodule) {
                let child = self.own(self.load_one(&submodule, &item)?);
                self.set_attr(leaf.get(), &item, child.get())?;
            }
        }
        Ok(leaf.into_raw())
    }

    /// Fetch one module from `sys.modules`, running its initialiser on first import.
    ///
    /// The module is visible in `sys.modules` while its initialiser runs, so
    /// cyclic imports see the partially initialised module.
    fn load_one(&self, qualified: &str, last: &str) -> HostResult<ObjRef> {
        let key = DictKey::Str(qualified.to_string());
        if let Some(existing) = self.dict_get(self.modules, &key) {
            self.incref(existing);
            return Ok(existing);
        }
        let init = self
            .registry
            .borrow()
            .get(qualified)
            .cloned()
            .ok_or_else(|| HostError::import(format!("No module named {last}")))?;

        let module = self.own(self.new_module(qualified)?);
        let name = self.own(self.new_str(qualified)?);
        self.set_item(self.modules, name.get(), module.get())?;

        // A module body reports its own line numbers.
        self.set_current_line(0);
        tracing::debug!(target: "shimrt_host", module = qualified, "initialising module");
        if let Err(err) = init(self, module.get()) {
            self.dict_remove(self.modules, &key);
            return Err(err);
        }
        Ok(module.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use shimrt_core::ExceptionKind;

    use super::*;

    #[test]
    fn dotted_import_returns_top_package() {
        let host = ReferenceHost::new();
        host.register_module("pkg", |_, _| Ok(()));
        host.register_module("pkg.sub", |host, module| {
            let value = host.own(host.new_int(7)?);
            host.set_attr(module, "value", value.get())
        });

        let top = host.own(host.import_module("pkg.sub", None).unwrap());
        let name = host.own(host.get_attr(top.get(), "__name__").unwrap());
        assert_eq!(host.text_contents(name.get()).as_deref(), Some("pkg"));

        let list = host.own(host.new_list().unwrap());
        let leaf = host.own(host.import_module("pkg.sub", Some(list.get())).unwrap());
        let value = host.own(host.get_attr(leaf.get(), "value").unwrap());
        assert_eq!(host.as_i64(value.get()), Ok(7));
    }

    #[test]
    fn failed_initialiser_is_removed_from_sys_modules() {
        let host = ReferenceHost::new();
        host.register_module("broken", |_, _| Err(HostError::value("boom")));
        let err = host.import_module("broken", None).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::Value);

        let key = host.own(host.new_str("broken").unwrap());
        assert_eq!(host.contains(host.modules, key.get()), Ok(false));
    }

    #[test]
    fn unknown_module() {
        let host = ReferenceHost::new();
        let err = host.import_module("missing.child", None).unwrap_err();
        assert_eq!(err.message, "No module named missing");
    }
}
