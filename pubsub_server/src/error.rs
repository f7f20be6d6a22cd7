//! Error types for the PubSubSQL server.

use thiserror::Error;

/// Server error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire framing error.
    #[error("wire error: {0}")]
    Wire(#[from] pubsub_wire::WireError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ServerError::Config("invalid PUBSUBSQL_BIND_ADDR".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: invalid PUBSUBSQL_BIND_ADDR"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: ServerError = io.into();
        assert!(matches!(err, ServerError::Io(_)));
    }
}
