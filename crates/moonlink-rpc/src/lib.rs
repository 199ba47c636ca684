//! Resilient JSON-RPC session for Moonraker controllers.
//!
//! This crate owns the connection to a controller: token exchange, WebSocket
//! upgrade, request/reply correlation, notification fan-out, heartbeats and
//! unbounded reconnection.
//!
//! # Architecture
//!
//! - [`protocol`]: JSON-RPC 2.0 envelopes and inbound frame classification
//! - [`transport`]: Token handshake, WebSocket halves and heartbeat tracking
//! - [`session`]: Reconnecting [`Session`] with its background loop
//! - [`listener`]: Notification listener trait and per-listener delivery
//! - [`endpoint`]: `host:port` addressing
//! - [`error`]: Error and Result types
//!
//! # Example
//!
//! ```no_run
//! use moonlink_rpc::{Endpoint, Notification, Session, SessionConfig};
//!
//! # async fn example() -> Result<(), moonlink_rpc::Error> {
//! let endpoint: Endpoint = "voron.local:7125".parse()?;
//! let session = Session::new(endpoint, SessionConfig::default());
//!
//! session.subscribe(|n: Notification| async move {
//!     println!("{}", n.method);
//!     anyhow::Ok(())
//! });
//! session.open().await?;
//!
//! let info = session.request("printer.info", None).await?;
//! println!("{info}");
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod session;
pub mod transport;

pub use endpoint::{DEFAULT_PORT, Endpoint};

pub use error::{Error, Result};

pub use listener::{ListenerFuture, NotificationListener};

pub use protocol::{
    CONNECTED_METHOD, JSONRPC_VERSION, Message, Notification, Request, Response, RpcError,
};

pub use session::{
    ConnectionState, HEARTBEAT_INTERVAL, RECONNECT_INTERVAL, Session, SessionConfig,
};
