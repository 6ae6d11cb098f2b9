//! Error types and Result aliases for the planner

use std::fmt;

/// Numeric error classes, mirroring the engine's result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Generic error (schema violation, malformed request)
    Error,
    /// Out of memory
    Nomem,
    /// Value out of range
    Range,
    /// Library used incorrectly
    Misuse,
}

impl ErrorCode {
    /// Short human-readable name for the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Error => "error",
            ErrorCode::Nomem => "out of memory",
            ErrorCode::Range => "out of range",
            ErrorCode::Misuse => "misuse",
        }
    }
}

/// Error type carried by all fallible planner operations
#[derive(Debug, Clone)]
pub struct Error {
    /// Error class
    pub code: ErrorCode,
    /// Optional descriptive message
    pub message: Option<String>,
}

impl Error {
    /// Create an error with just a code
    pub fn new(code: ErrorCode) -> Self {
        Error {
            code,
            message: None,
        }
    }

    /// Create an error with a code and a descriptive message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Error {
            code,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}", msg),
            None => write!(f, "{}", self.code.as_str()),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for planner operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_message() {
        let err = Error::with_message(ErrorCode::Error, "no query solution");
        assert_eq!(err.to_string(), "no query solution");
    }

    #[test]
    fn test_display_without_message() {
        let err = Error::new(ErrorCode::Nomem);
        assert_eq!(err.to_string(), "out of memory");
    }
}
