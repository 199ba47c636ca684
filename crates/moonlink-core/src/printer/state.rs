use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse printer lifecycle state.
///
/// Firmware print states map to their own variants; anything unrecognized is
/// kept verbatim in `Other` so it still compares and displays correctly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PrinterState {
    #[default]
    Disconnected,
    Shutdown,
    Ready,
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
    Other(String),
}

impl PrinterState {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Shutdown => "shutdown",
            Self::Ready => "ready",
            Self::Standby => "standby",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }

    #[must_use]
    pub fn is_printing(&self) -> bool {
        matches!(self, Self::Printing)
    }

    /// States in which a job summary is meaningful
    #[must_use]
    pub fn has_job(&self) -> bool {
        matches!(self, Self::Printing | Self::Complete)
    }
}

impl From<&str> for PrinterState {
    fn from(s: &str) -> Self {
        match s {
            "disconnected" => Self::Disconnected,
            "shutdown" => Self::Shutdown,
            "ready" => Self::Ready,
            "standby" => Self::Standby,
            "printing" => Self::Printing,
            "paused" => Self::Paused,
            "complete" => Self::Complete,
            "cancelled" => Self::Cancelled,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for PrinterState {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<PrinterState> for String {
    fn from(state: PrinterState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_states_round_trip() {
        for name in [
            "disconnected",
            "shutdown",
            "ready",
            "standby",
            "printing",
            "paused",
            "complete",
            "cancelled",
            "error",
        ] {
            let state = PrinterState::from(name);
            assert!(!matches!(state, PrinterState::Other(_)), "{name}");
            assert_eq!(state.to_string(), name);
        }
    }

    #[test]
    fn test_unknown_state_is_preserved() {
        let state = PrinterState::from("calibrating");
        assert_eq!(state, PrinterState::Other("calibrating".to_string()));
        assert_eq!(state.as_str(), "calibrating");
    }

    #[test]
    fn test_serde_uses_firmware_strings() {
        let json = serde_json::to_string(&PrinterState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");

        let state: PrinterState = serde_json::from_str("\"printing\"").unwrap();
        assert!(state.is_printing());
    }

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(PrinterState::default(), PrinterState::Disconnected);
    }
}
