//! Error types for the zone pool

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing zones.
///
/// The type is `Clone` because the pool keeps the first fatal error as a
/// sticky deferred status and hands a copy to every later allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Caller passed an argument the device or pool cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Device does not meet the pool's requirements
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Backend I/O failure
    #[error("I/O error during {op}: {reason}")]
    Io { op: String, reason: String },

    /// Not enough space in a zone, or no metadata zone left
    #[error("No space: {0}")]
    NoSpace(String),

    /// Internal bookkeeping invariant violated
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an I/O error for a named backend operation.
    pub fn io(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Io {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for backend I/O failures.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io(format!("{:?}", err.kind()), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow device").into();
        assert!(err.is_io());
        assert!(err.to_string().contains("slow device"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::NoSpace("Out of metadata zones".into());
        assert_eq!(err.to_string(), "No space: Out of metadata zones");

        let err = Error::io("reset", "device gone");
        assert_eq!(err.to_string(), "I/O error during reset: device gone");
    }
}
