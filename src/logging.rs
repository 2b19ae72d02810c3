//! Log configuration and subscriber installation.
//!
//! The shim emits `tracing` events under the `shimrt::*` targets. Process
//! startup decides where they go by calling [`init_logging`] once.

use std::env;
use std::fmt;

pub const LOG_LEVEL_ENV: &str = "SHIMRT_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "SHIMRT_LOG_FORMAT";

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Resolved to `Text` at installation.
    Auto,
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "text" | "plain" | "compact" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Auto => "auto",
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

/// Logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    }
}

/// Log format and level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    /// Compiled programs stay quiet unless asked otherwise.
    pub const DEFAULT: Self = Self {
        format: LogFormat::Auto,
        level: LogLevel::Warn,
    };

    /// Defaults overridden by `SHIMRT_LOG_FORMAT` and `SHIMRT_LOG_LEVEL`.
    #[must_use]
    pub fn from_env() -> Self {
        let format = env::var(LOG_FORMAT_ENV).ok();
        let level = env::var(LOG_LEVEL_ENV).ok();
        Self::DEFAULT.with_overrides(format.as_deref(), level.as_deref())
    }

    /// Apply textual overrides; unparseable values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, format: Option<&str>, level: Option<&str>) -> Self {
        if let Some(parsed) = format.and_then(LogFormat::parse) {
            self.format = parsed;
        }
        if let Some(parsed) = level.and_then(LogLevel::parse) {
            self.level = parsed;
        }
        self
    }

    /// Settle `Auto` to a concrete format.
    #[must_use]
    pub fn resolved(self) -> Self {
        let format = match self.format {
            LogFormat::Auto => LogFormat::Text,
            other => other,
        };
        Self { format, ..self }
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Install the global `tracing` subscriber. Later calls are no-ops.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging(options: &LogOptions) {
    use std::sync::OnceLock;
    use tracing_subscriber::{EnvFilter, fmt};

    static INITIALISED: OnceLock<()> = OnceLock::new();

    INITIALISED.get_or_init(|| {
        let options = options.resolved();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(options.level.to_string()));
        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true);

        let installed = match options.format {
            LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
            _ => tracing::subscriber::set_global_default(builder.compact().finish()),
        };
        if installed.is_ok() {
            tracing::debug!(target: "shimrt", format = %options.format, level = %options.level, "logging initialised");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_and_level() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" text "), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("xml"), None);

        assert_eq!(LogLevel::parse("Warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error < LogLevel::Trace);
    }

    #[test]
    fn test_overrides_ignore_garbage() {
        let opts = LogOptions::DEFAULT.with_overrides(Some("json"), Some("nope"));
        assert_eq!(opts.format, LogFormat::Json);
        assert_eq!(opts.level, LogLevel::Warn);
    }

    #[test]
    fn test_resolved_settles_auto() {
        assert_eq!(LogOptions::DEFAULT.resolved().format, LogFormat::Text);
        let json = LogOptions {
            format: LogFormat::Json,
            level: LogLevel::Debug,
        };
        assert_eq!(json.resolved(), json);
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(&LogOptions::DEFAULT);
        init_logging(&LogOptions {
            format: LogFormat::Json,
            level: LogLevel::Trace,
        });
    }
}
