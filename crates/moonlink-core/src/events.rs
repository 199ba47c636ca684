//! Derived printer events and their listeners.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::printer::PrinterSnapshot;

/// Event names listeners register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "state", alias = "state_changed")]
    StateChanged,
    #[serde(rename = "progress", alias = "progress_changed")]
    ProgressChanged,
    #[serde(rename = "message")]
    Message,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [Self::StateChanged, Self::ProgressChanged, Self::Message];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StateChanged => "state_changed",
            Self::ProgressChanged => "progress_changed",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state" | "state_changed" => Ok(Self::StateChanged),
            "progress" | "progress_changed" => Ok(Self::ProgressChanged),
            "message" => Ok(Self::Message),
            other => Err(format!("unknown event: {other}")),
        }
    }
}

/// A change derived from the status stream, with the snapshot at that moment
#[derive(Debug, Clone, PartialEq)]
pub enum PrinterEvent {
    StateChanged(PrinterSnapshot),
    ProgressChanged(PrinterSnapshot),
    Message(PrinterSnapshot),
}

impl PrinterEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StateChanged(_) => EventKind::StateChanged,
            Self::ProgressChanged(_) => EventKind::ProgressChanged,
            Self::Message(_) => EventKind::Message,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> &PrinterSnapshot {
        match self {
            Self::StateChanged(s) | Self::ProgressChanged(s) | Self::Message(s) => s,
        }
    }
}

pub type EventFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: PrinterEvent) -> EventFuture;
}

impl<F, Fut> EventListener for F
where
    F: Fn(PrinterEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn on_event(&self, event: PrinterEvent) -> EventFuture {
        Box::pin(self(event))
    }
}

/// Listener registry keyed by event kind
#[derive(Default)]
pub struct EventListeners {
    listeners: Mutex<HashMap<EventKind, Vec<Arc<dyn EventListener>>>>,
}

impl EventListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<L: EventListener>(&self, kind: EventKind, listener: L) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every listener for the event's kind in registration order.
    ///
    /// A failing listener is logged and the rest still run.
    pub async fn emit(&self, event: PrinterEvent) {
        let kind = event.kind();
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for listener in listeners {
            if let Err(e) = listener.on_event(event.clone()).await {
                error!("got exception during invoke callback \"{}\": {:#}", kind, e);
            }
        }
    }
}
