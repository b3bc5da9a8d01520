//! Error types for wrapping and path parsing.
//!
//! Unreachable paths are deliberately *not* errors: the mutation APIs stay
//! total and report a no-op by returning the receiver unchanged.

use thiserror::Error;

/// Result type alias for permafrost operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while wrapping a value or parsing a path.
#[derive(Debug, Error)]
pub enum Error {
    /// A callable value reached the wrap boundary without a configured
    /// `to_plain` converter.
    #[error("cannot wrap a callable value: configure `Options::to_plain` to convert it first")]
    MissingConverter,

    /// The `to_plain` converter returned something other than a plain object.
    #[error("`to_plain` must return a plain object, but returned {got}")]
    InvalidConversionResult {
        /// Type name of the converter's return value.
        got: &'static str,
    },

    /// A dynamic path argument was neither a string nor an ordered key
    /// sequence.
    #[error("expected path to be a string or an ordered key sequence, but received {got}")]
    InvalidPathType {
        /// Type name of the rejected value.
        got: &'static str,
    },
}

impl Error {
    /// Create an [`Error::InvalidConversionResult`].
    #[inline]
    pub fn invalid_conversion(got: &'static str) -> Self {
        Error::InvalidConversionResult { got }
    }

    /// Create an [`Error::InvalidPathType`].
    #[inline]
    pub fn invalid_path_type(got: &'static str) -> Self {
        Error::InvalidPathType { got }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_conversion("number");
        assert!(err.to_string().contains("plain object"));
        assert!(err.to_string().contains("number"));

        let err = Error::invalid_path_type("boolean");
        assert!(err.to_string().contains("path"));
    }
}
