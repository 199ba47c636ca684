//! Printer state projection and controller facade for moonlink.
//!
//! - [`printer`]: snapshot of printer subsystems and derived change events
//! - [`moonraker`]: typed requests plus the notification dispatcher feeding
//!   the projection
//! - [`events`]: event kinds and listener registry
//! - [`config`]: JSON configuration file and XDG paths
//! - [`format`]: status text for human consumption

pub mod config;
pub mod events;
pub mod format;
pub mod moonraker;
pub mod printer;
pub mod types;

mod error;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use events::{EventKind, EventListener, EventListeners, PrinterEvent};
pub use moonraker::{Moonraker, SUBSCRIBED_OBJECTS};
pub use printer::{PROGRESS_STEP, Printer, PrinterSnapshot, PrinterState};
pub use types::{FileEntry, FileMetadata, HistoryJob, HistoryList, HistoryOrder, HistoryQuery};

pub use moonlink_rpc::{ConnectionState, Endpoint, Notification, SessionConfig};
