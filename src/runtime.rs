//! Process-wide shim state.
//!
//! A [`Shim`] is created once by process startup, after the host runtime is
//! ready, and lives as long as compiled code runs. It holds the caches the
//! helpers share: resolved built-ins, the unstreaming function, and the
//! empty body used for synthesized code records. All of them are released
//! through the host when the `Shim` drops.

use std::cell::OnceCell;
use std::fmt;

use shimrt_core::{Host, Owned, TypeFlags};

use crate::dispatch::CachedBuiltin;
use crate::error::ShimResult;
use crate::import::EmbeddedModules;
use crate::logging::{LogOptions, init_logging};

/// When three-argument class construction runs the metatype initializer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClassInitPolicy {
    /// Only when the produced metatype carries [`TypeFlags::HAVE_CLASS`].
    #[default]
    RequireClassFlag,
    /// Whenever the produced metatype exposes an initializer.
    Always,
}

impl ClassInitPolicy {
    pub fn admits(self, flags: TypeFlags) -> bool {
        match self {
            ClassInitPolicy::RequireClassFlag => flags.contains(TypeFlags::HAVE_CLASS),
            ClassInitPolicy::Always => true,
        }
    }
}

/// Startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimConfig {
    /// Module providing the constant loader.
    pub unstream_module: String,
    /// Loader function within `unstream_module`.
    pub unstream_function: String,
    pub class_init: ClassInitPolicy,
    pub log: LogOptions,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            unstream_module: "pickle".to_string(),
            unstream_function: "loads".to_string(),
            class_init: ClassInitPolicy::default(),
            log: LogOptions::default(),
        }
    }
}

impl ShimConfig {
    /// Defaults with log options read from the environment.
    pub fn from_env() -> Self {
        Self {
            log: LogOptions::from_env(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_unstream_module(mut self, module: impl Into<String>) -> Self {
        self.unstream_module = module.into();
        self
    }

    #[must_use]
    pub fn with_unstream_function(mut self, function: impl Into<String>) -> Self {
        self.unstream_function = function.into();
        self
    }

    #[must_use]
    pub fn with_class_init(mut self, policy: ClassInitPolicy) -> Self {
        self.class_init = policy;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: LogOptions) -> Self {
        self.log = log;
        self
    }
}

/// Built-ins the shim calls through the dispatcher.
pub(crate) struct Builtins<'h, H: Host> {
    pub compile: CachedBuiltin<'h, H>,
    pub open: CachedBuiltin<'h, H>,
    pub range: CachedBuiltin<'h, H>,
}

/// The shim layer bound to one host runtime.
///
/// Not `Sync`: every entry point runs on the thread holding the host's
/// execution context.
pub struct Shim<'h, H: Host> {
    host: &'h H,
    config: ShimConfig,
    pub(crate) builtins: Builtins<'h, H>,
    pub(crate) unstream_loads: OnceCell<Owned<'h, H>>,
    pub(crate) empty_body: OnceCell<Owned<'h, H>>,
    pub(crate) embedded: Option<Box<dyn EmbeddedModules<H> + 'h>>,
}

impl<'h, H: Host> Shim<'h, H> {
    pub fn new(host: &'h H) -> Self {
        Self::with_config(host, ShimConfig::default())
    }

    pub fn with_config(host: &'h H, config: ShimConfig) -> Self {
        Self {
            host,
            config,
            builtins: Builtins {
                compile: CachedBuiltin::new("compile"),
                open: CachedBuiltin::new("open"),
                range: CachedBuiltin::new("range"),
            },
            unstream_loads: OnceCell::new(),
            empty_body: OnceCell::new(),
            embedded: None,
        }
    }

    /// Install the registry of modules compiled into the executable.
    #[must_use]
    pub fn with_embedded_modules(mut self, modules: impl EmbeddedModules<H> + 'h) -> Self {
        self.embedded = Some(Box::new(modules));
        self
    }

    pub fn host(&self) -> &'h H {
        self.host
    }

    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    /// Install logging from [`ShimConfig::log`] and eagerly fill every cache.
    ///
    /// Process startup calls this before compiled code runs so no cache is
    /// first filled concurrently. A subscriber installed earlier is kept.
    pub fn initialize(&self) -> ShimResult<()> {
        init_logging(&self.config.log);
        self.builtins.compile.resolve(self.host)?;
        self.builtins.open.resolve(self.host)?;
        self.builtins.range.resolve(self.host)?;
        self.empty_code_body()?;
        self.unstream_init()?;
        tracing::debug!(target: "shimrt", "shim initialised");
        Ok(())
    }
}

impl<H: Host> fmt::Debug for Shim<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shim")
            .field("config", &self.config)
            .field("unstream_ready", &self.unstream_loads.get().is_some())
            .field("embedded", &self.embedded.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogFormat, LogLevel};
    use shimrt_host::ReferenceHost;

    #[test]
    fn test_class_init_policy() {
        assert!(ClassInitPolicy::RequireClassFlag.admits(TypeFlags::HAVE_CLASS | TypeFlags::HEAPTYPE));
        assert!(!ClassInitPolicy::RequireClassFlag.admits(TypeFlags::HEAPTYPE));
        assert!(ClassInitPolicy::Always.admits(TypeFlags::empty()));
    }

    #[test]
    fn test_config_builder() {
        let config = ShimConfig::default()
            .with_unstream_module("cPickle")
            .with_class_init(ClassInitPolicy::Always);
        assert_eq!(config.unstream_module, "cPickle");
        assert_eq!(config.unstream_function, "loads");
        assert_eq!(config.class_init, ClassInitPolicy::Always);
    }

    #[test]
    fn test_initialize_and_release() {
        let host = ReferenceHost::new();
        let baseline = host.live_objects();
        {
            let shim = Shim::new(&host);
            shim.initialize().unwrap();
            // Idempotent.
            shim.initialize().unwrap();
        }
        // The pickle module stays imported; only the shim's caches are gone.
        let pickle = host.own(host.import_module("pickle", None).unwrap());
        let loads = host.own(host.get_attr(pickle.get(), "loads").unwrap());
        assert_eq!(host.ref_count(loads.get()), Some(2));
        assert!(host.live_objects() > baseline);
    }

    #[test]
    fn test_initialize_installs_configured_logging() {
        let host = ReferenceHost::new();
        let log = LogOptions {
            format: LogFormat::Text,
            level: LogLevel::Debug,
        };
        let shim = Shim::with_config(&host, ShimConfig::default().with_log(log));
        assert_eq!(shim.config().log, log);

        shim.initialize().unwrap();
        assert!(tracing::dispatcher::has_been_set());
    }

    #[test]
    fn test_initialize_reports_missing_loader() {
        let host = ReferenceHost::new();
        let shim = Shim::with_config(&host, ShimConfig::default().with_unstream_module("nope"));
        let err = shim.initialize().unwrap_err();
        assert!(err.is_fatal());
    }
}
