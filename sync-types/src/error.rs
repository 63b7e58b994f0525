//! Error types for feedsync wire handling.

use thiserror::Error;

/// Errors that can occur while encoding or decoding feedsync data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed (malformed or unknown payload)
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// An identifier could not be parsed
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::InvalidId("not-a-uuid".into());
        assert_eq!(err.to_string(), "invalid identifier: not-a-uuid");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
