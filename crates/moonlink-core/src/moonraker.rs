//! Typed Moonraker facade over a [`Session`].
//!
//! Besides the request helpers, [`Moonraker`] registers an internal
//! notification listener that keeps the [`Printer`] projection current:
//!
//! | Notification                       | Effect                                   |
//! |------------------------------------|------------------------------------------|
//! | `notify_status_update`             | merge into the snapshot                  |
//! | `connected`, `notify_klippy_ready` | reset, resubscribe, seed from the reply  |
//! | `notify_klippy_disconnected`       | state `disconnected`                     |
//! | `notify_klippy_shutdown`           | state `shutdown`                         |
//! | `notify_gcode_response`            | debug log                                |
//!
//! The listener runs on its own task and handles notifications one at a
//! time, so a status update never lands before the resubscription seed.
//! Derived events are queued to a single delivery task started by
//! [`Moonraker::open`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use moonlink_rpc::{
    ConnectionState, Endpoint, Notification, NotificationListener, Session, SessionConfig,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, error, info};

use crate::config::MoonrakerConfig;
use crate::events::{EventKind, EventListener, EventListeners, PrinterEvent};
use crate::printer::{Printer, PrinterSnapshot, PrinterState};
use crate::types::{FileEntry, FileMetadata, HistoryList, HistoryQuery};
use crate::Result;

/// Status topics requested on every (re)connection
pub const SUBSCRIBED_OBJECTS: [&str; 15] = [
    "bed_mesh",
    "display_status",
    "extruder",
    "fan",
    "gcode_move",
    "heater_bed",
    "idle_timeout",
    "pause_resume",
    "print_stats",
    "toolhead",
    "virtual_sdcard",
    "webhooks",
    "motion_report",
    "firmware_retraction",
    "exclude_object",
];

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Params of `printer.objects.subscribe` for [`SUBSCRIBED_OBJECTS`]
#[must_use]
pub fn subscribe_params() -> Value {
    let objects: Map<String, Value> = SUBSCRIBED_OBJECTS
        .iter()
        .map(|name| ((*name).to_string(), Value::Null))
        .collect();
    json!({ "objects": objects })
}

/// Routes session notifications into the printer projection
struct Dispatcher {
    session: Session,
    printer: Arc<RwLock<Printer>>,
    events: mpsc::UnboundedSender<PrinterEvent>,
}

impl Dispatcher {
    async fn handle(&self, notification: Notification) -> anyhow::Result<()> {
        match notification.method.as_str() {
            "notify_status_update" => {
                let Value::Object(partial) = &notification.params else {
                    debug!("ignoring non-object status update: {}", notification.params);
                    return Ok(());
                };
                let events = self.printer.write().await.update(partial);
                self.publish(events);
            }
            "notify_gcode_response" => {
                debug!("gcode response: {}", notification.params);
            }
            "connected" | "notify_klippy_ready" => {
                self.printer.write().await.reset();
                info!(
                    "subscribing printer objects (method: \"{}\")",
                    notification.method
                );
                self.resubscribe().await?;
            }
            "notify_klippy_disconnected" => {
                let event = self
                    .printer
                    .write()
                    .await
                    .change_state(PrinterState::Disconnected);
                self.publish(event);
            }
            "notify_klippy_shutdown" => {
                let event = self
                    .printer
                    .write()
                    .await
                    .change_state(PrinterState::Shutdown);
                self.publish(event);
            }
            _ => {}
        }
        Ok(())
    }

    async fn resubscribe(&self) -> anyhow::Result<()> {
        let result = self
            .session
            .request("printer.objects.subscribe", Some(subscribe_params()))
            .await?;

        let events = match result.get("status") {
            Some(Value::Object(status)) => self.printer.write().await.update(status),
            _ => {
                debug!("subscription reply carried no status");
                Vec::new()
            }
        };
        self.publish(events);
        Ok(())
    }

    fn publish(&self, events: impl IntoIterator<Item = PrinterEvent>) {
        for event in events {
            // Receiver lives as long as the facade
            let _ = self.events.send(event);
        }
    }
}

async fn deliver_events(
    mut rx: mpsc::UnboundedReceiver<PrinterEvent>,
    listeners: Arc<EventListeners>,
) {
    while let Some(event) = rx.recv().await {
        listeners.emit(event).await;
    }
}

struct Inner {
    session: Session,
    printer: Arc<RwLock<Printer>>,
    listeners: Arc<EventListeners>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PrinterEvent>>>,
}

/// Controller facade. Clones share one session and one printer projection.
#[derive(Clone)]
pub struct Moonraker {
    inner: Arc<Inner>,
}

impl Moonraker {
    #[must_use]
    pub fn new(endpoint: Endpoint, config: SessionConfig) -> Self {
        let session = Session::new(endpoint, config);
        let printer = Arc::new(RwLock::new(Printer::new()));
        let (events, events_rx) = mpsc::unbounded_channel();

        let dispatcher = Arc::new(Dispatcher {
            session: session.clone(),
            printer: Arc::clone(&printer),
            events,
        });
        session.subscribe(move |notification: Notification| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.handle(notification).await }
        });

        Self {
            inner: Arc::new(Inner {
                session,
                printer,
                listeners: Arc::new(EventListeners::new()),
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Build from the `moonraker` config section.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint does not parse.
    pub fn from_config(config: &MoonrakerConfig) -> Result<Self> {
        Ok(Self::new(config.endpoint()?, config.session_config()))
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.inner.session.endpoint()
    }

    /// Start connecting and delivering events.
    ///
    /// # Errors
    ///
    /// Fails if the session is already running or was closed.
    pub async fn open(&self) -> Result<()> {
        self.inner.session.open().await?;

        let rx = self
            .inner
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = rx {
            self.inner
                .session
                .spawn(deliver_events(rx, Arc::clone(&self.inner.listeners)));
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.inner.session.close().await;
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.session.is_online()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.session.state()
    }

    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.session.state_changes()
    }

    /// Copy of the current printer snapshot
    pub async fn printer(&self) -> PrinterSnapshot {
        self.inner.printer.read().await.snapshot().clone()
    }

    pub fn add_listener<L: EventListener>(&self, kind: EventKind, listener: L) {
        self.inner.listeners.add(kind, listener);
    }

    /// Receive raw session notifications, including `connected`.
    pub fn subscribe_raw<L: NotificationListener>(&self, listener: L) {
        self.inner.session.subscribe(listener);
    }

    /// Send an arbitrary request.
    ///
    /// # Errors
    ///
    /// Returns `Error::Rpc` for connection failures and controller errors.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        Ok(self.inner.session.request(method, params).await?)
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn emergency_stop(&self) -> Result<Value> {
        self.request("printer.emergency_stop", None).await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn restart(&self) -> Result<Value> {
        self.request("printer.restart", None).await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn firmware_restart(&self) -> Result<Value> {
        self.request("printer.firmware_restart", None).await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn gcode_script(&self, script: &str) -> Result<Value> {
        self.request("printer.gcode.script", Some(json!({ "script": script })))
            .await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails, `Error::Json` on an unexpected
    /// reply shape.
    pub async fn get_file_list(&self) -> Result<Vec<FileEntry>> {
        self.request_as("server.files.list", None).await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails, `Error::Json` on an unexpected
    /// reply shape.
    pub async fn get_file_dir(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.request_as("server.files.list", Some(json!({ "path": path })))
            .await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails, `Error::Json` on an unexpected
    /// reply shape.
    pub async fn get_file_metadata(&self, filename: &str) -> Result<FileMetadata> {
        self.request_as(
            "server.files.metadata",
            Some(json!({ "filename": filename })),
        )
        .await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn print_start(&self, filename: &str) -> Result<Value> {
        self.request("printer.print.start", Some(json!({ "filename": filename })))
            .await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn print_pause(&self) -> Result<Value> {
        self.request("printer.print.pause", None).await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn print_resume(&self) -> Result<Value> {
        self.request("printer.print.resume", None).await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn print_cancel(&self) -> Result<Value> {
        self.request("printer.print.cancel", None).await
    }

    /// Query current values; `objects` maps subsystem to requested fields or null.
    ///
    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails.
    pub async fn objects_query(&self, objects: Value) -> Result<Value> {
        self.request("printer.objects.query", Some(json!({ "objects": objects })))
            .await
    }

    /// # Errors
    ///
    /// Returns `Error::Rpc` if the call fails, `Error::Json` on an unexpected
    /// reply shape.
    pub async fn history_list(&self, query: HistoryQuery) -> Result<HistoryList> {
        self.request_as("server.history.list", Some(query.to_params()))
            .await
    }

    /// Download a file under the gcodes root, typically a thumbnail.
    ///
    /// Returns `None` on any failure; the cause is logged.
    pub async fn get_thumbnail(&self, path: &str) -> Option<Vec<u8>> {
        let url = self
            .endpoint()
            .http_url(&format!("/server/files/gcodes/{path}"));

        match fetch_bytes(&url).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("failed to get \"{}\" ({:#})", url, e);
                None
            }
        }
    }
}

async fn fetch_bytes(url: &str) -> anyhow::Result<Vec<u8>> {
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        anyhow::bail!("invalid response code {}", status.as_u16());
    }

    Ok(response.bytes().await?.to_vec())
}
