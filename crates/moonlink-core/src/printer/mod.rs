//! Printer state projection.
//!
//! [`Printer`] folds `notify_status_update` payloads into a
//! [`PrinterSnapshot`] and reports what changed as [`PrinterEvent`]s:
//!
//! - `print_stats.state` differing from the current state -> `StateChanged`
//! - `display_status` touched while printing and crossing a 5% quantum ->
//!   `ProgressChanged`
//! - `display_status.message` present and non-null -> `Message`
//!
//! Events are returned to the caller rather than invoked inline, so the
//! projector itself never awaits a listener.

mod snapshot;
mod state;

pub use snapshot::{PrinterSnapshot, Subsystem};
pub use state::PrinterState;

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::events::PrinterEvent;

/// Progress granularity
pub const PROGRESS_STEP: f64 = 0.05;

/// Static configuration echo; large and irrelevant to live state
pub const CONFIG_ECHO: &str = "configfile";

/// Round `raw` down to a multiple of [`PROGRESS_STEP`].
#[must_use]
pub fn quantize_progress(raw: f64) -> f64 {
    (raw / PROGRESS_STEP).floor() * PROGRESS_STEP
}

#[derive(Debug, Clone, Default)]
pub struct Printer {
    snapshot: PrinterSnapshot,
}

impl Printer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> &PrinterSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn data(&self) -> &BTreeMap<String, Subsystem> {
        &self.snapshot.data
    }

    #[must_use]
    pub fn state(&self) -> &PrinterState {
        &self.snapshot.state
    }

    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        self.snapshot.progress
    }

    /// Shallow-merge a partial status update and derive events.
    ///
    /// Each subsystem's fields overwrite the stored ones key by key; fields
    /// absent from `partial` keep their last value.
    pub fn update(&mut self, partial: &Map<String, Value>) -> Vec<PrinterEvent> {
        for (name, fields) in partial {
            if name == CONFIG_ECHO {
                continue;
            }
            let Value::Object(fields) = fields else {
                debug!("ignoring non-object status for {}: {}", name, fields);
                continue;
            };

            let entry = self.snapshot.data.entry(name.clone()).or_default();
            for (key, value) in fields {
                entry.insert(key.clone(), value.clone());
            }
        }

        let mut events = Vec::new();

        let new_state = partial
            .get("print_stats")
            .and_then(|stats| stats.get("state"))
            .and_then(Value::as_str);
        if let Some(state) = new_state {
            events.extend(self.change_state(PrinterState::from(state)));
        }

        if let Some(display) = partial.get("display_status") {
            events.extend(self.update_progress());

            if display.get("message").is_some_and(|m| !m.is_null()) {
                events.push(PrinterEvent::Message(self.snapshot.clone()));
            }
        }

        events
    }

    /// Set the lifecycle state. Emits only when it actually changes.
    pub fn change_state(&mut self, state: PrinterState) -> Option<PrinterEvent> {
        if self.snapshot.state == state {
            return None;
        }
        self.snapshot.state = state;
        Some(PrinterEvent::StateChanged(self.snapshot.clone()))
    }

    /// Forget everything; used on every (re)connection.
    pub fn reset(&mut self) {
        self.snapshot = PrinterSnapshot::default();
    }

    fn update_progress(&mut self) -> Option<PrinterEvent> {
        let raw = self.snapshot.f64_field("display_status", "progress")?;
        let progress = quantize_progress(raw);

        // New print or firmware reset: take the value as the baseline
        if self.snapshot.progress.is_none_or(|current| current > progress) {
            self.snapshot.progress = Some(progress);
        }

        if !self.snapshot.state.is_printing() {
            return None;
        }

        if self.snapshot.progress.is_some_and(|current| current < progress) {
            self.snapshot.progress = Some(progress);
            return Some(PrinterEvent::ProgressChanged(self.snapshot.clone()));
        }
        None
    }
}
