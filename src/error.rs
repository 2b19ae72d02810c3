//! Error types for the shim layer.
//!
//! Shim helpers raise one of a small closed set of errors. Errors raised by
//! the host itself pass through unchanged in [`ShimError::Host`]. Compiled
//! code re-raises any of them in the host with [`ShimError::into_host_error`].

use shimrt_core::{ExceptionKind, HostError};
use thiserror::Error;

/// Result type for shim operations.
pub type ShimResult<T> = Result<T, ShimError>;

/// Errors raised by shim helpers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShimError {
    // =========================================================================
    // Raised by the shim
    // =========================================================================
    /// Operand outside its allowed range (bad character code, zero step).
    #[error("ValueError: {0}")]
    Value(String),

    /// Operand lacks a required capability, or has the wrong length or kind.
    #[error("TypeError: {0}")]
    Type(String),

    /// Expected host state is missing from a registry.
    #[error("LookupError: {0}")]
    Lookup(String),

    /// Expected host state is missing (e.g. the output stream).
    #[error("RuntimeError: {0}")]
    Runtime(String),

    // =========================================================================
    // Propagated
    // =========================================================================
    /// Raised by the host or by a delegated built-in.
    #[error(transparent)]
    Host(#[from] HostError),

    // =========================================================================
    // Unrecoverable
    // =========================================================================
    /// Internal inconsistency: an unresolvable built-in or a corrupt
    /// embedded constant. Callers must abort.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ShimError {
    pub fn value(message: impl Into<String>) -> Self {
        ShimError::Value(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ShimError::Type(message.into())
    }

    /// The host exception kind this error is raised as.
    pub fn kind(&self) -> ExceptionKind {
        match self {
            ShimError::Value(_) => ExceptionKind::Value,
            ShimError::Type(_) => ExceptionKind::Type,
            ShimError::Lookup(_) => ExceptionKind::Lookup,
            ShimError::Runtime(_) => ExceptionKind::Runtime,
            ShimError::Host(err) => err.kind,
            ShimError::Internal(_) => ExceptionKind::System,
        }
    }

    /// The formatted message, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ShimError::Value(m)
            | ShimError::Type(m)
            | ShimError::Lookup(m)
            | ShimError::Runtime(m)
            | ShimError::Internal(m) => m,
            ShimError::Host(err) => &err.message,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ShimError::Internal(_))
    }

    /// Convert into the error the host raises.
    pub fn into_host_error(self) -> HostError {
        match self {
            ShimError::Host(err) => err,
            other => HostError::new(other.kind(), other.message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shim_error_display() {
        let err = ShimError::value("range() step argument must not be zero");
        assert_eq!(err.to_string(), "ValueError: range() step argument must not be zero");

        let err = ShimError::Runtime("lost sys.stdout".into());
        assert_eq!(err.to_string(), "RuntimeError: lost sys.stdout");
    }

    #[test]
    fn test_host_errors_pass_through() {
        let host = HostError::overflow("Python int too large to convert to C long");
        let err: ShimError = host.clone().into();
        assert_eq!(err.kind(), ExceptionKind::Overflow);
        assert_eq!(err.to_string(), host.to_string());
        assert_eq!(err.into_host_error(), host);
    }

    #[test]
    fn test_into_host_error() {
        let err = ShimError::Lookup("lost sys.modules".into()).into_host_error();
        assert_eq!(err.kind, ExceptionKind::Lookup);
        assert_eq!(err.message, "lost sys.modules");

        let fatal = ShimError::Internal("unresolved builtin 'range'".into());
        assert!(fatal.is_fatal());
        assert_eq!(fatal.into_host_error().kind, ExceptionKind::System);
    }
}
