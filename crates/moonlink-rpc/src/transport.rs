//! WebSocket transport for the controller connection.
//!
//! Establishing a connection is a two step handshake:
//!
//! ```text
//! GET http://host:port/access/oneshot_token   -> {"result": "<token>"}
//! GET ws://host:port/websocket?token=<token>  -> 101 Switching Protocols
//! ```
//!
//! Once upgraded, the socket is split into a sink (owned by a writer task fed
//! through a channel, see [`write_frames`]) and a source (owned by the session
//! read loop). Liveness is tracked by [`Heartbeat`].

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, WsMessage>;
pub type WsSource = SplitStream<WsStream>;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    result: String,
}

/// Fetch a single-use access token from the controller.
///
/// # Errors
///
/// Returns `Error::Http` on transport failure and `Error::Token` on a non-200
/// status or a body without a string `result`.
pub async fn fetch_oneshot_token(http: &reqwest::Client, endpoint: &Endpoint) -> Result<String> {
    let response = http.get(endpoint.token_url()).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Token(format!("status {status}")));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::Token(e.to_string()))?;
    Ok(body.result)
}

/// Run the token exchange and upgrade to a WebSocket.
///
/// # Errors
///
/// Propagates token fetch failures and `Error::WebSocket` when the upgrade
/// is refused.
pub async fn connect(http: &reqwest::Client, endpoint: &Endpoint) -> Result<(WsSink, WsSource)> {
    let token = fetch_oneshot_token(http, endpoint).await?;
    debug!("oneshot token: {}", token);

    let url = endpoint.websocket_url(&token);
    let (ws, _) = connect_async(url.as_str()).await?;
    Ok(ws.split())
}

/// Drain `frames` into `sink` until the channel closes or `abort` fires.
///
/// Every write races `abort`, so a peer that stopped reading cannot pin the
/// task. A failed write cancels `abort` to stop the read loop as well. When
/// the channel closes, a close frame is sent before returning.
pub async fn write_frames(
    mut sink: WsSink,
    mut frames: mpsc::UnboundedReceiver<WsMessage>,
    abort: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = abort.cancelled() => return,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        tokio::select! {
            biased;
            () = abort.cancelled() => return,
            result = sink.send(frame) => {
                if let Err(e) = result {
                    warn!("websocket write failed: {}", e);
                    abort.cancel();
                    return;
                }
            }
        }
    }

    tokio::select! {
        biased;
        () = abort.cancelled() => {}
        result = sink.close() => {
            if let Err(e) = result {
                debug!("close frame not sent: {}", e);
            }
        }
    }
}

/// What an inbound WebSocket frame means to the read loop
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// JSON text to classify
    Text(String),
    /// Control or binary frame; proves liveness, carries nothing
    Ignored,
    /// Peer closed the socket
    Closed,
}

impl From<WsMessage> for Inbound {
    fn from(msg: WsMessage) -> Self {
        match msg {
            WsMessage::Text(text) => Inbound::Text(text.as_str().to_owned()),
            WsMessage::Close(_) => Inbound::Closed,
            WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
                Inbound::Ignored
            }
        }
    }
}

/// Action to take on a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    SendPing,
    Dead,
}

/// Ping/pong liveness tracking.
///
/// A ping goes out every interval. If nothing at all has been received from
/// the peer by the following tick, the connection is considered dead.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    awaiting: bool,
}

impl Heartbeat {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            awaiting: false,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record that a frame arrived from the peer.
    pub fn on_inbound(&mut self) {
        self.awaiting = false;
    }

    pub fn tick(&mut self) -> HeartbeatAction {
        if self.awaiting {
            return HeartbeatAction::Dead;
        }
        self.awaiting = true;
        HeartbeatAction::SendPing
    }

    #[must_use]
    pub fn ping() -> WsMessage {
        WsMessage::Ping(Vec::new().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_text() {
        let inbound = Inbound::from(WsMessage::Text("{\"id\":1}".into()));
        assert_eq!(inbound, Inbound::Text("{\"id\":1}".to_string()));
    }

    #[test]
    fn test_inbound_close() {
        assert_eq!(Inbound::from(WsMessage::Close(None)), Inbound::Closed);
    }

    #[test]
    fn test_inbound_control_frames_are_ignored() {
        assert_eq!(
            Inbound::from(WsMessage::Pong(Vec::new().into())),
            Inbound::Ignored
        );
        assert_eq!(
            Inbound::from(WsMessage::Binary(vec![1, 2, 3].into())),
            Inbound::Ignored
        );
    }

    #[test]
    fn test_heartbeat_pings_then_detects_silence() {
        let mut hb = Heartbeat::new(Duration::from_secs(5));
        assert_eq!(hb.tick(), HeartbeatAction::SendPing);
        assert_eq!(hb.tick(), HeartbeatAction::Dead);
    }

    #[test]
    fn test_heartbeat_inbound_keeps_alive() {
        let mut hb = Heartbeat::new(Duration::from_secs(5));
        for _ in 0..10 {
            assert_eq!(hb.tick(), HeartbeatAction::SendPing);
            hb.on_inbound();
        }
    }

    #[test]
    fn test_heartbeat_ping_frame() {
        assert!(matches!(Heartbeat::ping(), WsMessage::Ping(_)));
    }
}
