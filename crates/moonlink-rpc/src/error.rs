//! Error types for the moonlink-rpc crate.
//!
//! Connection-level failures (token fetch, socket upgrade, dropped sockets)
//! are logged and retried by the session loop; the variants below are what a
//! caller of [`Session::request`](crate::Session::request) or
//! [`Session::open`](crate::Session::open) can observe.

use crate::protocol::RpcError;

/// Unified error type for session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("moonraker not connected")]
    NotConnected,

    #[error("Connection lost before reply")]
    Disconnected,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session closed")]
    Closed,

    #[error("Unable to get oneshot token: {0}")]
    Token(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl Error {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// True for failures caused by the connection rather than the controller.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Disconnected
                | Self::Token(_)
                | Self::Http(_)
                | Self::WebSocket(_)
        )
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rpc_factory() {
        let err = Error::rpc(400, "Klippy Disconnected");
        match err {
            Error::Rpc { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "Klippy Disconnected");
            }
            _ => panic!("Expected Rpc error"),
        }
    }

    #[test]
    fn test_error_from_rpc_error() {
        let err: Error = RpcError::new(-32601, "Method not found").into();
        assert!(matches!(err, Error::Rpc { code: -32601, .. }));
        assert!(err.to_string().contains("Method not found"));
    }

    #[test]
    fn test_error_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::NotConnected.to_string(), "moonraker not connected");
        assert_eq!(
            Error::Disconnected.to_string(),
            "Connection lost before reply"
        );
        assert_eq!(Error::AlreadyRunning.to_string(), "Session already running");
        assert_eq!(Error::Closed.to_string(), "Session closed");
        assert!(
            Error::Token("status 401".to_string())
                .to_string()
                .contains("401")
        );
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(Error::NotConnected.is_connection_error());
        assert!(Error::Disconnected.is_connection_error());
        assert!(Error::Token("x".to_string()).is_connection_error());
        assert!(!Error::rpc(400, "bad").is_connection_error());
        assert!(!Error::Closed.is_connection_error());
    }

    #[test]
    fn test_error_debug_format() {
        let err = Error::rpc(-32000, "test error");
        let debug_str = format!("{err:?}");
        assert!(debug_str.contains("Rpc"));
        assert!(debug_str.contains("-32000"));
    }
}
