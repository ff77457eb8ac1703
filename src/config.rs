//! Engine configuration, loadable from YAML.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```yaml
//! segmentation:
//!   channel: "Ch 02"
//!   threshold: 0.5
//! filter:
//!   kind: savitzky_golay
//!   window: 11
//!   polyorder: 3
//! timeline:
//!   day_gap: collapse
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::data::status::StatusSelection;
use crate::signal::FilterConfig;
use crate::timeline::DayGap;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Column layout of trace CSV files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLayout {
    /// Headerless; column 0 is the record identifier, the rest are channels.
    #[default]
    Identified,
    /// Header row; all columns are channels except `identifier_column`.
    Tabular,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub layout: TraceLayout,
    /// Tabular layout only: header of the identifier column, if any.
    #[serde(default)]
    pub identifier_column: Option<String>,
}

// ---------------------------------------------------------------------------
// Segmentation / smoothing
// ---------------------------------------------------------------------------

/// A channel picked by position or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelRef {
    Index(usize),
    Name(String),
}

impl Default for ChannelRef {
    fn default() -> Self {
        ChannelRef::Index(0)
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRef::Index(i) => write!(f, "#{i}"),
            ChannelRef::Name(n) => write!(f, "{n:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Channel whose samples define the beads.
    #[serde(default)]
    pub channel: ChannelRef,

    /// Samples strictly above this value belong to a bead.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.0
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            channel: ChannelRef::default(),
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Odd values are bumped to the next even one.
    #[serde(default = "default_smoothing_window")]
    pub window: usize,
}

fn default_smoothing_window() -> usize {
    15
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window: default_smoothing_window(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timeline / join
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default)]
    pub day_gap: DayGap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Maximum distance between a status event and its timeline key.
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: u64,

    /// Stat1 / Stat2 pair to overlay; an unset field does not constrain its
    /// column.
    #[serde(default)]
    pub selection: StatusSelection,
}

fn default_tolerance_ms() -> u64 {
    1000
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: default_tolerance_ms(),
            selection: StatusSelection::default(),
        }
    }
}

impl JoinConfig {
    pub fn tolerance(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.tolerance_ms).unwrap_or(i64::MAX))
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub join: JoinConfig,
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("parsing engine config")
    }

    /// Load from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serialising engine config")
    }
}
