//! Remote data gateway abstraction.
//!
//! The coordinator only needs read/write/delete/list access to the
//! authoritative backend plus a way to upload files. It never depends on the
//! backend's protocol; [`HttpGateway`] is one adapter.

mod http;
#[cfg(test)]
pub(crate) mod memory;

pub use http::HttpGateway;

use serde_json::Value;
use thiserror::Error;

use crate::path::RecordPath;

/// Errors reported by a remote gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The backend answered with an error status.
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// Status code returned by the backend.
        status: u16,
        /// Backend-provided description.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(String),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Access to the authoritative remote store.
#[async_trait::async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fetch the record at `path`; `Ok(None)` means the backend reports it absent.
    async fn get(&self, path: &RecordPath) -> GatewayResult<Option<Value>>;

    /// Store `value` at `path`.
    async fn set(&self, path: &RecordPath, value: &Value) -> GatewayResult<()>;

    /// Delete the record at `path`.
    async fn delete(&self, path: &RecordPath) -> GatewayResult<()>;

    /// List the records under `prefix`.
    async fn list(&self, prefix: &RecordPath) -> GatewayResult<Vec<Value>>;

    /// Upload file contents to `remote_path` and return the public URL.
    async fn upload(&self, remote_path: &str, bytes: Vec<u8>) -> GatewayResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_display() {
        assert!(GatewayError::Transport("timeout".to_string())
            .to_string()
            .contains("timeout"));

        let rejected = GatewayError::Rejected {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert_eq!(rejected.to_string(), "rejected with status 403: forbidden");

        assert!(GatewayError::Decode("eof".to_string())
            .to_string()
            .contains("undecodable"));
    }
}
