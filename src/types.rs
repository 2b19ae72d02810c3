//! `type(obj)` and `type(name, bases, dict)`.

use shimrt_core::{Host, ObjRef, Owned};

use crate::error::ShimResult;
use crate::runtime::Shim;

/// The runtime type of `arg`, with a reference added.
pub fn type1<H: Host>(host: &H, arg: ObjRef) -> Owned<'_, H> {
    Owned::borrowed(host, host.type_of(arg))
}

impl<'h, H: Host> Shim<'h, H> {
    /// Build a class from a `(name, bases, dict)` triple.
    ///
    /// The base metatype's allocator runs first. When the produced object's
    /// own type is a metatype with an initializer (and the configured
    /// [`ClassInitPolicy`](crate::runtime::ClassInitPolicy) admits it), the
    /// initializer runs on the same triple. `__module__` is then set to
    /// `module_name`.
    pub fn type3(
        &self,
        module_name: ObjRef,
        name: ObjRef,
        bases: ObjRef,
        dict: ObjRef,
    ) -> ShimResult<Owned<'h, H>> {
        let host = self.host();
        let args = host.own(host.new_tuple(&[name, bases, dict])?);
        let result = host.own(host.type_new(host.type_type(), args.get())?);

        let metatype = host.type_of(result.get());
        if host.is_subtype(metatype, host.type_type())
            && self.config().class_init.admits(host.type_flags(metatype))
            && host.has_init(metatype)
        {
            host.call_init(metatype, result.get(), args.get())?;
        }

        host.set_attr(result.get(), "__module__", module_name)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClassInitPolicy, ShimConfig};
    use shimrt_core::{ExceptionKind, HostError, TypeFlags};
    use shimrt_host::{ClassSpec, NativeFn, ReferenceHost, TypeSlots};

    struct Triple<'h> {
        module: Owned<'h, ReferenceHost>,
        name: Owned<'h, ReferenceHost>,
        bases: Owned<'h, ReferenceHost>,
        dict: Owned<'h, ReferenceHost>,
    }

    fn triple<'h>(host: &'h ReferenceHost, name: &str, bases: &[ObjRef]) -> Triple<'h> {
        Triple {
            module: host.own(host.new_str("app.models").unwrap()),
            name: host.own(host.new_str(name).unwrap()),
            bases: host.own(host.new_tuple(bases).unwrap()),
            dict: host.own(host.new_dict()),
        }
    }

    #[test]
    fn test_type1_returns_type_with_reference() {
        let host = ReferenceHost::new();
        let value = host.own(host.new_int(1).unwrap());
        let int_type = host.type_of(value.get());
        let before = host.ref_count(int_type).unwrap();

        let ty = type1(&host, value.get());
        assert_eq!(ty, int_type);
        assert_eq!(host.ref_count(int_type), Some(before + 1));
        drop(ty);
        assert_eq!(host.ref_count(int_type), Some(before));
    }

    #[test]
    fn test_type3_builds_named_class() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let t = triple(&host, "Foo", &[]);

        let class = shim
            .type3(t.module.get(), t.name.get(), t.bases.get(), t.dict.get())
            .unwrap();
        assert!(host.is_subtype(host.type_of(class.get()), host.type_type()));
        assert_eq!(host.type_name(class.get()), "Foo");

        let module = host.own(host.get_attr(class.get(), "__module__").unwrap());
        assert_eq!(host.text_contents(module.get()).as_deref(), Some("app.models"));
    }

    #[test]
    fn test_type3_failure_leaks_nothing() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let module = host.own(host.new_str("m").unwrap());
        let bad_name = host.own(host.new_int(3).unwrap());
        let bases = host.own(host.new_tuple(&[]).unwrap());
        let dict = host.own(host.new_dict());

        let baseline = host.live_objects();
        let err = shim
            .type3(module.get(), bad_name.get(), bases.get(), dict.get())
            .unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::Type);
        assert_eq!(host.live_objects(), baseline);
    }

    /// A metatype whose initializer marks each class it initialises.
    fn marking_metatype(host: &ReferenceHost, flags: TypeFlags) -> Owned<'_, ReferenceHost> {
        host.own(host.new_class(
            "Meta",
            ClassSpec {
                bases: vec![host.type_type()],
                flags,
                slots: TypeSlots {
                    init: Some(NativeFn::new("Meta.__init__", |host: &ReferenceHost, args: &[ObjRef]| {
                        let marker = host.own(host.new_int(1)?);
                        host.set_attr(args[0], "initialised", marker.get())?;
                        let none = host.none();
                        host.incref(none);
                        Ok(none)
                    })),
                    ..TypeSlots::default()
                },
                ..ClassSpec::default()
            },
        ))
    }

    #[test]
    fn test_type3_runs_metatype_initializer() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let meta = marking_metatype(&host, TypeFlags::HAVE_CLASS);
        let base = host.own(host.new_class(
            "Base",
            ClassSpec {
                metatype: Some(meta.get()),
                ..ClassSpec::default()
            },
        ));
        let t = triple(&host, "Derived", &[base.get()]);

        let class = shim
            .type3(t.module.get(), t.name.get(), t.bases.get(), t.dict.get())
            .unwrap();
        assert_eq!(host.type_of(class.get()), meta.get());
        assert!(host.get_attr(class.get(), "initialised").map(|r| host.decref(r)).is_ok());
    }

    #[test]
    fn test_class_init_policy_gates_initializer() {
        let host = ReferenceHost::new();
        let meta = marking_metatype(&host, TypeFlags::empty());
        let base = host.own(host.new_class(
            "Base",
            ClassSpec {
                metatype: Some(meta.get()),
                ..ClassSpec::default()
            },
        ));

        let strict = Shim::new(&host);
        let t = triple(&host, "Plain", &[base.get()]);
        let class = strict
            .type3(t.module.get(), t.name.get(), t.bases.get(), t.dict.get())
            .unwrap();
        let err = host.get_attr(class.get(), "initialised").unwrap_err();
        assert!(err.is(ExceptionKind::Attribute));

        let lenient = Shim::with_config(&host, ShimConfig::default().with_class_init(ClassInitPolicy::Always));
        let class = lenient
            .type3(t.module.get(), t.name.get(), t.bases.get(), t.dict.get())
            .unwrap();
        assert!(host.get_attr(class.get(), "initialised").map(|r| host.decref(r)).is_ok());
    }

    #[test]
    fn test_initializer_error_propagates() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let meta = host.own(host.new_class(
            "Strict",
            ClassSpec {
                bases: vec![host.type_type()],
                flags: TypeFlags::HAVE_CLASS,
                slots: TypeSlots {
                    init: Some(NativeFn::new("Strict.__init__", |_: &ReferenceHost, _: &[ObjRef]| {
                        Err(HostError::type_error("Strict classes need a docstring"))
                    })),
                    ..TypeSlots::default()
                },
                ..ClassSpec::default()
            },
        ));
        let base = host.own(host.new_class(
            "Base",
            ClassSpec {
                metatype: Some(meta.get()),
                ..ClassSpec::default()
            },
        ));
        let t = triple(&host, "Child", &[base.get()]);

        let baseline = host.live_objects();
        let err = shim
            .type3(t.module.get(), t.name.get(), t.bases.get(), t.dict.get())
            .unwrap_err();
        assert_eq!(err.message(), "Strict classes need a docstring");
        assert_eq!(host.live_objects(), baseline);
    }
}
