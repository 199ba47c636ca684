//! Typed results of the controller's file and history endpoints.
//!
//! Only the fields this crate reads are typed; everything else the controller
//! returns is kept in `extra` so nothing is lost.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// One entry of `server.files.list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(alias = "filename")]
    pub path: String,

    #[serde(default)]
    pub modified: f64,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub permissions: String,
}

/// Embedded G-code preview image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub width: u32,

    #[serde(default)]
    pub height: u32,

    #[serde(default)]
    pub size: u64,

    /// Path relative to the gcodes root, usable with `get_thumbnail`
    pub relative_path: String,
}

/// Result of `server.files.metadata`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub filename: Option<String>,

    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub modified: Option<f64>,

    #[serde(default)]
    pub slicer: Option<String>,

    #[serde(default)]
    pub estimated_time: Option<f64>,

    #[serde(default)]
    pub filament_total: Option<f64>,

    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileMetadata {
    /// Largest thumbnail, which the slicer lists last
    #[must_use]
    pub fn largest_thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnails.last()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOrder {
    Asc,
    #[default]
    Desc,
}

impl HistoryOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl fmt::Display for HistoryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("invalid order '{other}', expected asc or desc")),
        }
    }
}

/// Parameters of `server.history.list`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: u32,
    pub start: u32,
    pub order: HistoryOrder,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            start: 0,
            order: HistoryOrder::Desc,
        }
    }
}

impl HistoryQuery {
    /// Most recent job only
    #[must_use]
    pub fn latest() -> Self {
        Self {
            limit: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn to_params(&self) -> Value {
        json!({
            "limit": self.limit,
            "start": self.start,
            "order": self.order.as_str(),
        })
    }
}

/// One finished or running job from the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryJob {
    #[serde(default)]
    pub job_id: String,

    pub filename: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub start_time: f64,

    #[serde(default)]
    pub end_time: Option<f64>,

    #[serde(default)]
    pub print_duration: f64,

    #[serde(default)]
    pub total_duration: f64,

    #[serde(default)]
    pub filament_used: f64,

    #[serde(default)]
    pub exists: bool,

    #[serde(default)]
    pub metadata: Option<FileMetadata>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HistoryJob {
    #[must_use]
    pub fn thumbnails(&self) -> &[Thumbnail] {
        self.metadata
            .as_ref()
            .map_or(&[], |meta| meta.thumbnails.as_slice())
    }
}

/// Result of `server.history.list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryList {
    #[serde(default)]
    pub count: u64,

    #[serde(default)]
    pub jobs: Vec<HistoryJob>,
}
