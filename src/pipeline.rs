//! End-to-end batch run for one trace source.
//!
//! [`prepare`] does the work that only depends on the file contents (identifier
//! parsing and timeline compression) and is what [`crate::state::Session`]
//! caches. [`analyze`] runs everything that depends on the tunable parameters.

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ChannelRef, EngineConfig};
use crate::data::identifier::{parse_timestamp, IdentifierError};
use crate::data::loader::{StatusSeries, StatusSkipCounts};
use crate::data::model::{Bead, Category, TraceSource};
use crate::data::status::{self, StatusSelection};
use crate::signal::{segment, smooth, FilterError, SmoothError};
use crate::timeline::{self, DayGap, DaySpan, JoinOutcome, TimelineMap};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{name}: none of the {rows} record identifiers could be parsed")]
    NoValidData { name: String, rows: usize },

    #[error("{name}: segmentation channel {channel} not found ({available} channels)")]
    ChannelNotFound {
        name: String,
        channel: ChannelRef,
        available: usize,
    },

    #[error("{name}: {column} has {len} rows, expected {expected}")]
    RaggedChannels {
        name: String,
        column: String,
        len: usize,
        expected: usize,
    },

    #[error(transparent)]
    Smooth(#[from] SmoothError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

// ---------------------------------------------------------------------------
// Preparation (parameter independent)
// ---------------------------------------------------------------------------

/// Identifier parse outcomes for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub rows: usize,
    pub parsed: usize,
    pub malformed: usize,
    pub missing_date: usize,
    pub invalid_timestamp: usize,
}

impl ParseReport {
    fn record(&mut self, err: &IdentifierError) {
        match err {
            IdentifierError::Malformed(_) => self.malformed += 1,
            IdentifierError::MissingDate { .. } => self.missing_date += 1,
            IdentifierError::InvalidTimestamp { .. } => self.invalid_timestamp += 1,
        }
    }

    pub fn rejected(&self) -> usize {
        self.malformed + self.missing_date + self.invalid_timestamp
    }
}

/// A source with its per-row timestamps and compressed timeline.
#[derive(Debug, Clone)]
pub struct PreparedSource {
    pub source: TraceSource,
    /// One entry per row; `None` where the identifier did not parse. Empty
    /// when the source carries no identifiers.
    pub timestamps: Vec<Option<NaiveDateTime>>,
    pub timeline: TimelineMap,
    pub parse: ParseReport,
}

/// Every channel, and the identifier column when present, must have one
/// entry per row.
fn check_rows(source: &TraceSource) -> Result<(), EngineError> {
    let expected = source.len();
    let columns = source
        .channels
        .iter()
        .map(|c| (c.name.as_str(), c.samples.len()));
    for (column, len) in columns {
        if len != expected {
            return Err(EngineError::RaggedChannels {
                name: source.name.clone(),
                column: column.to_string(),
                len,
                expected,
            });
        }
    }
    Ok(())
}

/// Parse every identifier of `source` and compress its timeline.
///
/// Fails with [`EngineError::RaggedChannels`] when the columns disagree on the
/// row count, and with [`EngineError::NoValidData`] when the source has
/// identifier rows and not a single one parses.
pub fn prepare(source: TraceSource, day_gap: DayGap) -> Result<PreparedSource, EngineError> {
    check_rows(&source)?;
    let mut parse = ParseReport::default();
    let timestamps: Vec<Option<NaiveDateTime>> = match &source.identifiers {
        Some(ids) => ids
            .iter()
            .map(|id| {
                parse.rows += 1;
                match parse_timestamp(id) {
                    Ok(ts) => {
                        parse.parsed += 1;
                        Some(ts)
                    }
                    Err(e) => {
                        debug!("{}: {e}", source.name);
                        parse.record(&e);
                        None
                    }
                }
            })
            .collect(),
        None => Vec::new(),
    };

    if parse.rows > 0 && parse.parsed == 0 {
        return Err(EngineError::NoValidData {
            name: source.name.clone(),
            rows: parse.rows,
        });
    }
    if parse.rejected() > 0 {
        warn!(
            "{}: {} of {} identifiers unusable ({} malformed, {} without date, {} invalid)",
            source.name,
            parse.rejected(),
            parse.rows,
            parse.malformed,
            parse.missing_date,
            parse.invalid_timestamp
        );
    }

    let timeline = TimelineMap::build(timestamps.iter().flatten().copied(), day_gap);
    Ok(PreparedSource {
        source,
        timestamps,
        timeline,
        parse,
    })
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeadChannel {
    pub channel: String,
    pub raw: Vec<f64>,
    pub smoothed: Vec<f64>,
    /// Empty when the filter could not run on this bead.
    pub filtered: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeadReport {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub channels: Vec<BeadChannel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub original: NaiveDateTime,
    pub compressed: NaiveDateTime,
    pub value: f64,
}

/// One channel plotted against the compressed time axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineCurve {
    pub channel: String,
    pub points: Vec<CurvePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineReport {
    pub day_gap: DayGap,
    pub days: Vec<DaySpan>,
    pub curves: Vec<TimelineCurve>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusOverlay {
    pub selection: StatusSelection,
    /// Stat1 values present in the series, in order of first appearance.
    pub stat1_options: Vec<Category>,
    /// Stat2 values seen with the selected Stat1; empty without one.
    pub stat2_options: Vec<Category>,
    pub skipped_rows: StatusSkipCounts,
    /// Events passing the selection, before joining.
    pub selected: usize,
    #[serde(flatten)]
    pub joined: JoinOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub rows: usize,
    pub channels: Vec<String>,
    pub parse: ParseReport,
    pub segmentation_channel: String,
    pub threshold: f64,
    pub smoothing_window: usize,
    pub filter: &'static str,
    pub beads: Vec<BeadReport>,
    pub timeline: TimelineReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusOverlay>,
}

// ---------------------------------------------------------------------------
// Analysis (parameter dependent)
// ---------------------------------------------------------------------------

fn resolve_channel(source: &TraceSource, channel: &ChannelRef) -> Result<usize, EngineError> {
    let found = match channel {
        ChannelRef::Index(i) => source.channel(*i).map(|_| *i),
        ChannelRef::Name(n) => source.channel_index(n),
    };
    found.ok_or_else(|| EngineError::ChannelNotFound {
        name: source.name.clone(),
        channel: channel.clone(),
        available: source.channels.len(),
    })
}

/// Run segmentation, smoothing, filtering, timeline curves and (when a status
/// series is given) the status join.
///
/// Configuration problems fail the whole run before any samples are touched.
/// A filter that cannot run on one bead (e.g. a bead shorter than the
/// Savitzky-Golay window) only leaves that bead's filtered curve empty.
pub fn analyze(
    prepared: &PreparedSource,
    config: &EngineConfig,
    status: Option<&StatusSeries>,
) -> Result<SourceReport, EngineError> {
    let source = &prepared.source;
    check_rows(source)?;
    let seg_idx = resolve_channel(source, &config.segmentation.channel)?;
    if config.smoothing.window == 0 {
        return Err(SmoothError::ZeroWindow.into());
    }
    let prepared_filter = config.filter.prepare()?;

    let seg_channel = &source.channels[seg_idx];
    let beads = segment(&seg_channel.samples, config.segmentation.threshold);
    info!(
        "{}: {} beads on {} above {}",
        source.name,
        beads.len(),
        seg_channel.name,
        config.segmentation.threshold
    );

    let time_of = |i: usize| prepared.timestamps.get(i).copied().flatten();
    let mut bead_reports = Vec::with_capacity(beads.len());
    for (index, bead) in beads.iter().enumerate() {
        let mut channels = Vec::with_capacity(source.channels.len());
        for channel in &source.channels {
            let raw = bead.slice(&channel.samples).to_vec();
            let smoothed = smooth(&raw, config.smoothing.window)?;
            let filtered = match prepared_filter.apply(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "{}: bead {index} ({}): {} skipped: {e}",
                        source.name,
                        channel.name,
                        prepared_filter.config().label()
                    );
                    Vec::new()
                }
            };
            channels.push(BeadChannel {
                channel: channel.name.clone(),
                raw,
                smoothed,
                filtered,
            });
        }
        bead_reports.push(BeadReport {
            index,
            start: bead.start,
            end: bead.end,
            start_time: time_of(bead.start),
            end_time: time_of(bead.end),
            channels,
        });
    }

    let timeline = TimelineReport {
        day_gap: prepared.timeline.day_gap(),
        days: prepared.timeline.day_spans(),
        curves: timeline_curves(prepared),
    };

    let status = status.map(|series| {
        let selection = config.join.selection.clone();
        let selected = status::select(&series.events, &selection);
        let stat1_options = status::stat1_options(&series.events);
        let stat2_options = selection
            .stat1
            .as_ref()
            .map(|s1| status::stat2_options(&series.events, s1))
            .unwrap_or_default();
        let joined = timeline::join(&prepared.timeline, &selected, config.join.tolerance());
        info!(
            "{}: {} of {} selected status events joined",
            source.name, joined.stats.matched, joined.stats.events
        );
        StatusOverlay {
            selection,
            stat1_options,
            stat2_options,
            skipped_rows: series.skipped,
            selected: selected.len(),
            joined,
        }
    });

    Ok(SourceReport {
        name: source.name.clone(),
        rows: source.len(),
        channels: source.channels.iter().map(|c| c.name.clone()).collect(),
        parse: prepared.parse,
        segmentation_channel: seg_channel.name.clone(),
        threshold: config.segmentation.threshold,
        smoothing_window: config.smoothing.window,
        filter: prepared_filter.config().label(),
        beads: bead_reports,
        timeline,
        status,
    })
}

/// Every channel against the compressed axis, rows ordered by original time.
/// Rows without a timestamp are left out.
fn timeline_curves(prepared: &PreparedSource) -> Vec<TimelineCurve> {
    let mut rows: Vec<(usize, NaiveDateTime, NaiveDateTime)> = prepared
        .timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let ts = (*ts)?;
            prepared.timeline.compress(ts).map(|c| (i, ts, c))
        })
        .collect();
    rows.sort_by_key(|&(_, ts, _)| ts);

    prepared
        .source
        .channels
        .iter()
        .map(|channel| TimelineCurve {
            channel: channel.name.clone(),
            points: rows
                .iter()
                .map(|&(i, original, compressed)| CurvePoint {
                    original,
                    compressed,
                    value: channel.samples.get(i).copied().unwrap_or(f64::NAN),
                })
                .collect(),
        })
        .collect()
}

/// Selected beads as plain index ranges, handy for callers that only need
/// the segmentation.
pub fn bead_ranges(report: &SourceReport) -> Vec<Bead> {
    report
        .beads
        .iter()
        .map(|b| Bead::new(b.start, b.end))
        .collect()
}
