use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Rpc(#[from] moonlink_rpc::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// True when the controller was unreachable rather than refusing the call.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Rpc(e) if e.is_connection_error())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_rpc_is_transparent() {
        let err = Error::Rpc(moonlink_rpc::Error::NotConnected);
        assert_eq!(err.to_string(), "moonraker not connected");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("IO error"));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("bad endpoint".to_string());
        assert_eq!(err.to_string(), "Config error: bad endpoint");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<i32>("\"not a number\"").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(Error::from(moonlink_rpc::Error::Disconnected).is_connection_error());
        assert!(!Error::from(moonlink_rpc::Error::rpc(400, "nope")).is_connection_error());
        assert!(!Error::Config("x".to_string()).is_connection_error());
    }
}
