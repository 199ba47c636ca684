//! Controller endpoint addressing.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Port used when the endpoint omits one
pub const DEFAULT_PORT: u16 = 7125;

/// `host:port` address of a Moonraker controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Plain HTTP URL for `path` on this controller.
    #[must_use]
    pub fn http_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("http://{self}{path}")
        } else {
            format!("http://{self}/{path}")
        }
    }

    #[must_use]
    pub fn token_url(&self) -> String {
        self.http_url("/access/oneshot_token")
    }

    #[must_use]
    pub fn websocket_url(&self, token: &str) -> String {
        format!("ws://{self}/websocket?token={token}")
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Accepts `host`, `host:port`, `[v6addr]` and `[v6addr]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || Error::InvalidEndpoint(s.to_string());

        let (host, port) = if let Some(bracketed) = s.strip_prefix('[') {
            let (host, rest) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match rest {
                "" => None,
                _ => Some(rest.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
