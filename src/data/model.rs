use std::fmt;
use std::ops::RangeInclusive;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Category – a Stat1 / Stat2 cell of the status series
// ---------------------------------------------------------------------------

/// A dynamically-typed category cell. Status exports mix numeric machine codes
/// and text labels in the same column, so values keep the type they parse as.
/// Deduplicated through a `HashSet` downstream, hence the manual `Eq` and
/// `Hash` (floats compare by bit pattern).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Category {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Category::Bool(a), Category::Bool(b)) => a == b,
            (Category::Integer(a), Category::Integer(b)) => a == b,
            (Category::Float(a), Category::Float(b)) => a.to_bits() == b.to_bits(),
            (Category::Text(a), Category::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Category {}

impl std::hash::Hash for Category {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Category::Text(s) => s.hash(state),
            Category::Integer(i) => i.hash(state),
            Category::Float(f) => f.to_bits().hash(state),
            Category::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Text(s) => write!(f, "{s}"),
            Category::Integer(i) => write!(f, "{i}"),
            Category::Float(v) => write!(f, "{v}"),
            Category::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl Category {
    /// Infer the type of a raw CSV cell. Returns `None` for an empty cell.
    pub fn from_cell(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Ok(i) = s.parse::<i64>() {
            return Some(Category::Integer(i));
        }
        if let Ok(f) = s.parse::<f64>() {
            return Some(Category::Float(f));
        }
        if s == "true" || s == "false" {
            return Some(Category::Bool(s == "true"));
        }
        Some(Category::Text(s.to_string()))
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Category::Text(s.to_string())
    }
}

impl From<i64> for Category {
    fn from(i: i64) -> Self {
        Category::Integer(i)
    }
}

// ---------------------------------------------------------------------------
// StatusEvent – one row of the machine status series
// ---------------------------------------------------------------------------

/// One row of an independently-timestamped status series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub timestamp: NaiveDateTime,
    pub stat1: Category,
    pub stat2: Category,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Channel / TraceSource – one loaded trace file
// ---------------------------------------------------------------------------

/// A single numeric column of a trace file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub name: String,
    pub samples: Vec<f64>,
}

/// One trace file: an optional record identifier per row plus its numeric channels.
/// All channels have the same length as `identifiers` (when present).
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSource {
    /// File name (or any caller-chosen label).
    pub name: String,
    /// Record identifier per row; `None` for exports that carry no identifiers.
    pub identifiers: Option<Vec<String>>,
    pub channels: Vec<Channel>,
}

impl TraceSource {
    /// Build a source from row-major samples. Short rows are padded with NaN so
    /// every channel ends up with one entry per row.
    pub fn from_rows(
        name: impl Into<String>,
        channel_names: Vec<String>,
        identifiers: Option<Vec<String>>,
        rows: &[Vec<f64>],
    ) -> Self {
        let channels = channel_names
            .into_iter()
            .enumerate()
            .map(|(col, name)| Channel {
                name,
                samples: rows
                    .iter()
                    .map(|row| row.get(col).copied().unwrap_or(f64::NAN))
                    .collect(),
            })
            .collect();
        TraceSource {
            name: name.into(),
            identifiers,
            channels,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.identifiers
            .as_ref()
            .map(Vec::len)
            .or_else(|| self.channels.first().map(|c| c.samples.len()))
            .unwrap_or(0)
    }

    /// Whether the source has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// Bead – one above-threshold run
// ---------------------------------------------------------------------------

/// Closed index interval `[start, end]` of a maximal above-threshold run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bead {
    pub start: usize,
    pub end: usize,
}

impl Bead {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Bead { start, end }
    }

    /// Number of samples in the bead (never zero).
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }

    /// The bead's slice of `samples`.
    pub fn slice<'a>(&self, samples: &'a [f64]) -> &'a [f64] {
        &samples[self.range()]
    }
}

impl From<(usize, usize)> for Bead {
    fn from((start, end): (usize, usize)) -> Self {
        Bead::new(start, end)
    }
}
