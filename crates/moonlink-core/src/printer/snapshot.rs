use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::PrinterState;

/// Last known field values of one subsystem
pub type Subsystem = Map<String, Value>;

/// Point-in-time view of everything known about the printer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrinterSnapshot {
    /// Subsystem name to merged fields, e.g. `extruder` -> `{temperature, target}`
    pub data: BTreeMap<String, Subsystem>,

    pub state: PrinterState,

    /// Last quantized progress in `[0, 1]`
    pub progress: Option<f64>,
}

impl PrinterSnapshot {
    #[must_use]
    pub fn subsystem(&self, name: &str) -> Option<&Subsystem> {
        self.data.get(name)
    }

    #[must_use]
    pub fn field(&self, subsystem: &str, key: &str) -> Option<&Value> {
        self.data.get(subsystem)?.get(key)
    }

    #[must_use]
    pub fn f64_field(&self, subsystem: &str, key: &str) -> Option<f64> {
        self.field(subsystem, key)?.as_f64()
    }

    #[must_use]
    pub fn str_field(&self, subsystem: &str, key: &str) -> Option<&str> {
        self.field(subsystem, key)?.as_str()
    }

    /// Current `display_status.message`, if the firmware set one
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.str_field("display_status", "message")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
