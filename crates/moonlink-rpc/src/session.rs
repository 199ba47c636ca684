//! Reconnecting JSON-RPC session.
//!
//! A [`Session`] keeps one logical connection to the controller alive for as
//! long as it is open. The background loop walks through
//!
//! ```text
//! Idle -> Authenticating -> Connected -> Streaming -> Closing -> Idle (retry)
//! ```
//!
//! retrying every `reconnect_interval` without limit. Requests issued while
//! connected are correlated to replies by id; everything still pending when
//! the socket goes away is failed with [`Error::Disconnected`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::listener::{NotificationListener, run_listener};
use crate::protocol::{Message, Notification, Request};
use crate::transport::{self, Heartbeat, HeartbeatAction, Inbound, WsSink, WsSource};

pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on flushing queued frames and the close frame during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Session timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Fixed delay between connection attempts
    pub reconnect_interval: Duration,

    /// Ping period; two silent periods mark the socket dead
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: RECONNECT_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// Where the current connection attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Authenticating,
    Connected,
    Streaming,
    Closing,
}

impl ConnectionState {
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Self::Connected | Self::Streaming)
    }
}

/// Pending request waiting for a reply
type PendingRequest = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct Listeners {
    registered: Vec<Arc<dyn NotificationListener>>,
    senders: Vec<mpsc::UnboundedSender<Notification>>,
    started: bool,
}

/// Outbound half of a live connection
struct Link {
    outbound: mpsc::UnboundedSender<WsMessage>,
    writer: JoinHandle<()>,
    abort: CancellationToken,
}

impl Link {
    fn start(sink: WsSink) -> Self {
        let (outbound, frames) = mpsc::unbounded_channel();
        let abort = CancellationToken::new();
        let writer = tokio::spawn(transport::write_frames(sink, frames, abort.clone()));
        Self {
            outbound,
            writer,
            abort,
        }
    }

    /// Let the writer flush and close the socket, or drop it once the
    /// writer has been stuck for [`CLOSE_TIMEOUT`].
    async fn shutdown(self) {
        let Self {
            outbound,
            mut writer,
            abort,
        } = self;
        drop(outbound);

        let result = match tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await {
            Ok(result) => result,
            Err(_) => {
                debug!("timed out flushing websocket, dropping it");
                abort.cancel();
                writer.await
            }
        };
        if let Err(e) = result
            && !e.is_cancelled()
        {
            error!("websocket writer terminated abnormally: {}", e);
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    task: Option<JoinHandle<()>>,
    closed: bool,
}

struct Inner {
    endpoint: Endpoint,
    config: SessionConfig,
    link: std::sync::Mutex<Option<Link>>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    next_id: AtomicU64,
    listeners: std::sync::Mutex<Listeners>,
    tasks: TaskTracker,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
    lifecycle: Mutex<Lifecycle>,
}

/// Handle to a reconnecting controller session. Clones share the connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    #[must_use]
    pub fn new(endpoint: Endpoint, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                endpoint,
                config,
                link: std::sync::Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                listeners: std::sync::Mutex::new(Listeners::default()),
                tasks: TaskTracker::new(),
                cancel: CancellationToken::new(),
                state,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn config(&self) -> SessionConfig {
        self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Register a notification listener.
    ///
    /// Listeners receive every server notification plus the synthesized
    /// `connected` event, in the order frames arrive. Registering after
    /// [`open`](Self::open) starts delivery immediately, which requires a
    /// running Tokio runtime.
    pub fn subscribe<L: NotificationListener>(&self, listener: L) {
        let listener: Arc<dyn NotificationListener> = Arc::new(listener);
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if listeners.started {
            let sender = self.inner.spawn_listener(Arc::clone(&listener));
            listeners.senders.push(sender);
        }
        listeners.registered.push(listener);
    }

    /// Run `future` on the session's task set. It is cancelled and awaited by
    /// [`close`](Self::close).
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.inner.cancel.clone();
        self.inner.tasks.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = future => {}
            }
        });
    }

    /// Start the background connection loop.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyRunning` if the loop is live and `Error::Closed`
    /// once the session has been closed.
    pub async fn open(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.closed {
            return Err(Error::Closed);
        }
        if lifecycle.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(Error::AlreadyRunning);
        }

        self.inner.start_listeners();
        lifecycle.task = Some(tokio::spawn(run(Arc::clone(&self.inner))));
        Ok(())
    }

    /// Stop the loop, close the socket and wait for every listener task.
    ///
    /// Requests still waiting for a reply fail with `Error::Disconnected`.
    /// No listener is invoked after this returns. Safe to call repeatedly or
    /// on a session that was never opened.
    pub async fn close(&self) {
        let task = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            lifecycle.closed = true;
            lifecycle.task.take()
        };

        self.inner.cancel.cancel();

        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!("session loop terminated abnormally: {}", e);
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        // Listeners may hold clones of this session
        let listeners = std::mem::take(
            &mut *self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        drop(listeners);

        self.inner.teardown().await;
        self.inner.set_state(ConnectionState::Idle);
    }

    /// Send a JSON-RPC request and wait for the matching reply.
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` when no socket is live; nothing is sent.
    /// - `Error::Rpc` when the controller answers with an error object.
    /// - `Error::Disconnected` when the connection drops before the reply.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        if !self.inner.has_link() {
            return Err(Error::NotConnected);
        }

        let text = serde_json::to_string(&Request::new(method, params, id))?;
        debug!("send_request: {}", text);

        // Registered first so a fast reply always finds its slot
        self.inner.pending.lock().await.insert(id, tx);
        if let Err(e) = self.inner.send_frame(WsMessage::Text(text.into())) {
            self.inner.pending.lock().await.remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Number of requests awaiting a reply
    pub async fn pending_requests(&self) -> usize {
        self.inner.pending.lock().await.len()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn spawn_listener(
        &self,
        listener: Arc<dyn NotificationListener>,
    ) -> mpsc::UnboundedSender<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tasks
            .spawn(run_listener(listener, rx, self.cancel.clone()));
        tx
    }

    fn start_listeners(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if listeners.started {
            return;
        }
        listeners.started = true;

        let registered = listeners.registered.clone();
        listeners.senders = registered
            .into_iter()
            .map(|listener| self.spawn_listener(listener))
            .collect();
    }

    /// Queue a notification for every listener without waiting on them.
    fn dispatch(&self, notification: &Notification) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners
            .senders
            .retain(|sender| sender.send(notification.clone()).is_ok());
    }

    async fn process_message(&self, text: &str) {
        debug!("data: {}", text);

        match Message::parse(text) {
            Ok(Some(Message::Notification(notification))) => self.dispatch(&notification),
            Ok(Some(Message::Response(response))) => {
                let slot = self.pending.lock().await.remove(&response.id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(response.into_result().map_err(Error::from));
                    }
                    None => debug!("dropping reply for unknown request id {}", response.id),
                }
            }
            Ok(None) => debug!("ignoring unclassified frame"),
            Err(e) => warn!("can't process websocket message: {}", e),
        }
    }

    fn has_link(&self) -> bool {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Queue a frame for the writer task. Never waits on the socket.
    fn send_frame(&self, frame: WsMessage) -> Result<()> {
        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(link) = link.as_ref() else {
            return Err(Error::NotConnected);
        };
        link.outbound.send(frame).map_err(|_| Error::NotConnected)
    }

    /// Read frames until the socket ends or the writer gives up. Returns true
    /// when cancelled.
    async fn stream(&self, mut source: WsSource, writer_failed: &CancellationToken) -> bool {
        let mut heartbeat = Heartbeat::new(self.config.heartbeat_interval);
        let period = heartbeat.interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return true,
                () = writer_failed.cancelled() => return false,
                frame = source.next() => {
                    let msg = match frame {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!("websocket read failed: {}", e);
                            return false;
                        }
                        None => return false,
                    };

                    heartbeat.on_inbound();
                    match Inbound::from(msg) {
                        Inbound::Text(text) => self.process_message(&text).await,
                        Inbound::Ignored => {}
                        Inbound::Closed => return false,
                    }
                }
                _ = ticker.tick() => match heartbeat.tick() {
                    HeartbeatAction::SendPing => {
                        if let Err(e) = self.send_frame(Heartbeat::ping()) {
                            warn!("heartbeat ping failed: {}", e);
                            return false;
                        }
                    }
                    HeartbeatAction::Dead => {
                        warn!("no heartbeat response within {:?}", period);
                        return false;
                    }
                },
            }
        }
    }

    /// Fail every pending request and forget it.
    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (id, tx) in pending.drain() {
            debug!("clearing pending request {}", id);
            let _ = tx.send(Err(Error::Disconnected));
        }
    }

    async fn teardown(&self) {
        let link = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(link) = link {
            link.shutdown().await;
        }
        self.fail_pending().await;
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().build()?)
}

async fn run(inner: Arc<Inner>) {
    let mut next_connect_time = Instant::now();
    let mut http: Option<reqwest::Client> = None;

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep_until(next_connect_time) => {}
        }
        next_connect_time = Instant::now() + inner.config.reconnect_interval;

        inner.fail_pending().await;
        inner.set_state(ConnectionState::Authenticating);

        if http.is_none() {
            match http_client() {
                Ok(client) => http = Some(client),
                Err(e) => {
                    error!("failed to establish connection ({})", e);
                    inner.set_state(ConnectionState::Idle);
                    continue;
                }
            }
        }
        let Some(client) = http.clone() else {
            continue;
        };

        let connected = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            result = transport::connect(&client, &inner.endpoint) => result,
        };

        let (sink, source) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                error!("failed to establish connection ({})", e);
                inner.set_state(ConnectionState::Idle);
                continue;
            }
        };

        let link = Link::start(sink);
        let writer_failed = link.abort.clone();
        *inner.link.lock().unwrap_or_else(PoisonError::into_inner) = Some(link);
        inner.set_state(ConnectionState::Connected);
        info!("connected to ws://{}/websocket", inner.endpoint);

        inner.dispatch(&Notification::connected());
        inner.set_state(ConnectionState::Streaming);

        let cancelled = inner.stream(source, &writer_failed).await;

        inner.set_state(ConnectionState::Closing);
        warn!("closing websocket connection");
        inner.teardown().await;

        if cancelled {
            break;
        }
        inner.set_state(ConnectionState::Idle);
    }

    inner.set_state(ConnectionState::Closing);
    inner.teardown().await;
    drop(http);
    inner.set_state(ConnectionState::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offline_session() -> Session {
        Session::new(Endpoint::new("127.0.0.1", 1), SessionConfig::default())
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.reconnect_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_connection_state_online() {
        assert!(!ConnectionState::Idle.is_online());
        assert!(!ConnectionState::Authenticating.is_online());
        assert!(ConnectionState::Connected.is_online());
        assert!(ConnectionState::Streaming.is_online());
        assert!(!ConnectionState::Closing.is_online());
    }

    #[tokio::test]
    async fn test_request_while_disconnected_fails_immediately() {
        let session = offline_session();

        let err = session
            .request("printer.gcode.script", Some(json!({"script": "G28"})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotConnected));
        assert_eq!(session.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_close_without_open_is_safe() {
        let session = offline_session();
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_open_after_close_is_rejected() {
        let session = offline_session();
        session.close().await;
        assert!(matches!(session.open().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let session = offline_session();
        session.open().await.unwrap();
        assert!(matches!(session.open().await, Err(Error::AlreadyRunning)));
        session.close().await;
    }

    #[tokio::test]
    async fn test_spawned_task_is_cancelled_by_close() {
        let session = offline_session();
        session.spawn(std::future::pending());
        // Would hang forever if close() did not cancel the task
        session.close().await;
    }

    #[tokio::test]
    async fn test_dispatch_reaches_started_listeners() {
        let session = offline_session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.subscribe(move |n: Notification| {
            let tx = tx.clone();
            async move {
                tx.send(n.method)?;
                anyhow::Ok(())
            }
        });

        session.inner.start_listeners();
        session
            .inner
            .process_message(r#"{"method":"notify_klippy_ready"}"#)
            .await;

        assert_eq!(rx.recv().await.unwrap(), "notify_klippy_ready");
        session.close().await;
    }

    #[tokio::test]
    async fn test_reply_resolves_pending_slot() {
        let session = offline_session();
        let (tx, rx) = oneshot::channel();
        session.inner.pending.lock().await.insert(3, tx);

        session
            .inner
            .process_message(r#"{"jsonrpc":"2.0","result":{"status":"ok"},"id":3}"#)
            .await;

        assert_eq!(rx.await.unwrap().unwrap(), json!({"status": "ok"}));
        assert_eq!(session.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_error_reply_resolves_with_rpc_error() {
        let session = offline_session();
        let (tx, rx) = oneshot::channel();
        session.inner.pending.lock().await.insert(5, tx);

        session
            .inner
            .process_message(r#"{"error":{"code":400,"message":"Klippy Disconnected"},"id":5}"#)
            .await;

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Rpc { code: 400, ref message } if message == "Klippy Disconnected"));
    }

    #[tokio::test]
    async fn test_unknown_reply_id_is_dropped() {
        let session = offline_session();
        let (tx, _rx) = oneshot::channel();
        session.inner.pending.lock().await.insert(1, tx);

        session
            .inner
            .process_message(r#"{"result":"ok","id":99}"#)
            .await;

        assert_eq!(session.pending_requests().await, 1);
    }

    #[tokio::test]
    async fn test_fail_pending_resolves_everything() {
        let session = offline_session();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        {
            let mut pending = session.inner.pending.lock().await;
            pending.insert(1, tx1);
            pending.insert(2, tx2);
        }

        session.inner.fail_pending().await;

        assert!(matches!(rx1.await.unwrap(), Err(Error::Disconnected)));
        assert!(matches!(rx2.await.unwrap(), Err(Error::Disconnected)));
        assert_eq!(session.pending_requests().await, 0);
    }
}
