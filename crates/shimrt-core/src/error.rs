//! Host error types.
//!
//! A [`HostError`] is what the host runtime raises: a closed [`ExceptionKind`]
//! plus a formatted message. The kind is `#[repr(u8)]` so it can cross a
//! native call boundary as a plain code.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// The kinds of error the host runtime can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExceptionKind {
    Value = 1,
    Type = 2,
    Lookup = 3,
    Key = 4,
    Attribute = 5,
    Index = 6,
    Runtime = 7,
    Overflow = 8,
    Import = 9,
    Io = 10,
    Syntax = 11,
    UnicodeEncode = 12,
    System = 13,
}

impl ExceptionKind {
    /// The host-visible exception class name.
    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::Value => "ValueError",
            ExceptionKind::Type => "TypeError",
            ExceptionKind::Lookup => "LookupError",
            ExceptionKind::Key => "KeyError",
            ExceptionKind::Attribute => "AttributeError",
            ExceptionKind::Index => "IndexError",
            ExceptionKind::Runtime => "RuntimeError",
            ExceptionKind::Overflow => "OverflowError",
            ExceptionKind::Import => "ImportError",
            ExceptionKind::Io => "IOError",
            ExceptionKind::Syntax => "SyntaxError",
            ExceptionKind::UnicodeEncode => "UnicodeEncodeError",
            ExceptionKind::System => "SystemError",
        }
    }

    /// Whether this kind is caught by a handler for `LookupError`.
    pub fn is_lookup(self) -> bool {
        matches!(
            self,
            ExceptionKind::Lookup | ExceptionKind::Key | ExceptionKind::Index
        )
    }
}

/// An error raised by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", kind.name())]
pub struct HostError {
    /// The exception kind.
    pub kind: ExceptionKind,
    /// The formatted message.
    pub message: String,
}

impl HostError {
    /// Create a new host error.
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Value, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Type, message)
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Attribute, message)
    }

    pub fn key(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Key, message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Overflow, message)
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Import, message)
    }

    /// Check the error kind.
    pub fn is(&self, kind: ExceptionKind) -> bool {
        self.kind == kind
    }
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_error_display() {
        let err = HostError::value("chr() arg not in range(256)");
        assert_eq!(format!("{err}"), "ValueError: chr() arg not in range(256)");
    }

    #[test]
    fn exception_kind_code_round_trip() {
        let code: u8 = ExceptionKind::Overflow.into();
        assert_eq!(code, 8);
        assert_eq!(ExceptionKind::try_from(code), Ok(ExceptionKind::Overflow));
        assert!(ExceptionKind::try_from(0u8).is_err());
    }

    #[test]
    fn lookup_family() {
        assert!(ExceptionKind::Key.is_lookup());
        assert!(ExceptionKind::Index.is_lookup());
        assert!(!ExceptionKind::Attribute.is_lookup());
    }
}
