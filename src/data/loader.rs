use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use super::model::{Category, StatusEvent, TraceSource};
use crate::config::{InputConfig, TraceLayout};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load one trace file. Dispatch by extension.
///
/// Supported formats:
/// * `.csv` – laid out as configured in [`InputConfig::layout`]
pub fn load_trace(path: &Path, input: &InputConfig) -> Result<TraceSource> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "csv" => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            read_trace(&source_name(path), file, input)
        }
        other => bail!("Unsupported file extension: .{other}"),
    }
}

/// Parse a trace CSV from any reader. `name` labels the resulting source.
pub fn read_trace<R: Read>(name: &str, reader: R, input: &InputConfig) -> Result<TraceSource> {
    let source = match input.layout {
        TraceLayout::Identified => read_identified(name, reader)?,
        TraceLayout::Tabular => read_tabular(name, reader, input.identifier_column.as_deref())?,
    };
    info!(
        "loaded {name}: {} rows, {} channels",
        source.len(),
        source.channels.len()
    );
    Ok(source)
}

/// Expand a list of files and directories into the trace files to load.
/// Directories contribute every `*.csv` directly inside them, sorted by name.
pub fn collect_trace_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("reading directory {}", input.display()))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .map(|ext| ext.eq_ignore_ascii_case("csv"))
                            .unwrap_or(false)
                })
                .collect();
            found.sort();
            debug!("{}: {} trace files", input.display(), found.len());
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Identified layout (monitoring export)
// ---------------------------------------------------------------------------

/// Headerless rows: `<record identifier>,<ch1>,<ch2>,...`.
/// Channels are named `Ch 01`, `Ch 02`, ... after their column position.
fn read_identified<R: Read>(name: &str, reader: R) -> Result<TraceSource> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut identifiers = Vec::new();
    let mut rows = Vec::new();
    let mut width = 0;

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("{name}: CSV row {row_no}"))?;
        let id = record.get(0).unwrap_or("").trim().to_string();
        let values: Vec<f64> = record.iter().skip(1).map(parse_sample).collect();
        width = width.max(values.len());
        identifiers.push(id);
        rows.push(values);
    }

    let channel_names = (1..=width).map(|i| format!("Ch {i:02}")).collect();
    Ok(TraceSource::from_rows(
        name,
        channel_names,
        Some(identifiers),
        &rows,
    ))
}

// ---------------------------------------------------------------------------
// Tabular layout (curve-fitting export)
// ---------------------------------------------------------------------------

/// Header row with column names; every column is a numeric channel except the
/// optional identifier column.
fn read_tabular<R: Read>(
    name: &str,
    reader: R,
    identifier_column: Option<&str>,
) -> Result<TraceSource> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("{name}: reading CSV headers"))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let id_idx = match identifier_column {
        Some(col) => Some(
            headers
                .iter()
                .position(|h| h == col)
                .with_context(|| format!("{name}: CSV missing '{col}' column"))?,
        ),
        None => None,
    };

    let channel_names: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != id_idx)
        .map(|(_, h)| h.clone())
        .collect();

    let mut identifiers = id_idx.map(|_| Vec::new());
    let mut rows = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("{name}: CSV row {row_no}"))?;
        if let (Some(ids), Some(idx)) = (identifiers.as_mut(), id_idx) {
            ids.push(record.get(idx).unwrap_or("").trim().to_string());
        }
        let values: Vec<f64> = (0..headers.len())
            .filter(|i| Some(*i) != id_idx)
            .map(|i| record.get(i).map_or(f64::NAN, parse_sample))
            .collect();
        rows.push(values);
    }

    Ok(TraceSource::from_rows(name, channel_names, identifiers, &rows))
}

/// Empty or non-numeric cells become NaN so rows stay aligned across channels.
fn parse_sample(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(f64::NAN)
}

// ---------------------------------------------------------------------------
// Status series
// ---------------------------------------------------------------------------

/// Why a status row was excluded before joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusSkip {
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("unparseable timestamp")]
    BadTimestamp,
    #[error("non-numeric value")]
    BadValue,
}

/// Per-reason counts of excluded status rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSkipCounts {
    pub missing_field: usize,
    pub bad_timestamp: usize,
    pub bad_value: usize,
}

impl StatusSkipCounts {
    fn record(&mut self, skip: StatusSkip) {
        match skip {
            StatusSkip::MissingField(_) => self.missing_field += 1,
            StatusSkip::BadTimestamp => self.bad_timestamp += 1,
            StatusSkip::BadValue => self.bad_value += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.missing_field + self.bad_timestamp + self.bad_value
    }
}

/// The usable rows of a status CSV plus what was thrown away.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSeries {
    pub events: Vec<StatusEvent>,
    pub skipped: StatusSkipCounts,
}

const STATUS_COLUMNS: [&str; 4] = ["Timestamp", "Stat1", "Stat2", "Value"];

const STATUS_TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// Load a status CSV with columns `Timestamp, Stat1, Stat2, Value`.
pub fn load_status(path: &Path) -> Result<StatusSeries> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening status file {}", path.display()))?;
    read_status(file).with_context(|| format!("reading status file {}", path.display()))
}

pub fn read_status<R: Read>(reader: R) -> Result<StatusSeries> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .context("reading status CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut idx = [0usize; 4];
    for (slot, col) in idx.iter_mut().zip(STATUS_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == col)
            .with_context(|| format!("status CSV missing '{col}' column"))?;
    }

    let mut series = StatusSeries::default();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("status CSV row {row_no}"))?;
        let cells: [&str; 4] = idx.map(|i| record.get(i).unwrap_or(""));
        match status_event(cells) {
            Ok(event) => series.events.push(event),
            Err(skip) => {
                debug!("status row {row_no} skipped: {skip}");
                series.skipped.record(skip);
            }
        }
    }

    info!(
        "status series: {} events, {} rows skipped",
        series.events.len(),
        series.skipped.total()
    );
    Ok(series)
}

fn status_event(cells: [&str; 4]) -> std::result::Result<StatusEvent, StatusSkip> {
    let [timestamp, stat1, stat2, value] = cells;
    for (cell, col) in cells.iter().zip(STATUS_COLUMNS) {
        if cell.trim().is_empty() {
            return Err(StatusSkip::MissingField(col));
        }
    }
    let timestamp = parse_status_timestamp(timestamp).ok_or(StatusSkip::BadTimestamp)?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|_| StatusSkip::BadValue)?;
    Ok(StatusEvent {
        timestamp,
        stat1: Category::from_cell(stat1).ok_or(StatusSkip::MissingField("Stat1"))?,
        stat2: Category::from_cell(stat2).ok_or(StatusSkip::MissingField("Stat2"))?,
        value,
    })
}

/// Parse the timestamp formats status exports are known to use.
pub fn parse_status_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    STATUS_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identified() -> InputConfig {
        InputConfig::default()
    }

    #[test]
    fn identified_rows_keep_identifier_and_channels() {
        let csv = "093015_240101Y0001_X_F1.csv,1.5,2.5\n\
                   093016_240101Y0001_X_F1.csv,3.5\n";
        let src = read_trace("a.csv", csv.as_bytes(), &identified()).unwrap();
        assert_eq!(src.len(), 2);
        assert_eq!(
            src.identifiers.as_deref().unwrap()[1],
            "093016_240101Y0001_X_F1.csv"
        );
        assert_eq!(src.channels.len(), 2);
        assert_eq!(src.channels[0].name, "Ch 01");
        assert_eq!(src.channels[0].samples, vec![1.5, 3.5]);
        assert!(src.channels[1].samples[1].is_nan());
    }

    #[test]
    fn tabular_layout_reads_named_columns() {
        let input = InputConfig {
            layout: TraceLayout::Tabular,
            identifier_column: Some("name".into()),
        };
        let csv = "NIR,name,VIS\n1,a,2\n3,b,x\n";
        let src = read_trace("t.csv", csv.as_bytes(), &input).unwrap();
        let names: Vec<&str> = src.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["NIR", "VIS"]);
        assert_eq!(src.identifiers, Some(vec!["a".into(), "b".into()]));
        assert_eq!(src.channels[0].samples, vec![1.0, 3.0]);
        assert!(src.channels[1].samples[1].is_nan());
    }

    #[test]
    fn tabular_layout_requires_configured_identifier_column() {
        let input = InputConfig {
            layout: TraceLayout::Tabular,
            identifier_column: Some("id".into()),
        };
        assert!(read_trace("t.csv", "a,b\n1,2\n".as_bytes(), &input).is_err());
    }

    #[test]
    fn status_rows_with_gaps_are_counted_not_loaded() {
        let csv = "Timestamp,Stat1,Stat2,Value\n\
                   2024-01-01 10:00:00,ROBOT,1,0.5\n\
                   2024-01-01 10:00:01,,1,0.5\n\
                   yesterday,ROBOT,1,0.5\n\
                   2024-01-01T10:00:02.250,ROBOT,1,n/a\n\
                   2024/01/01 10:00:03,ROBOT,2,1\n";
        let series = read_status(csv.as_bytes()).unwrap();
        assert_eq!(series.events.len(), 2);
        assert_eq!(
            series.skipped,
            StatusSkipCounts {
                missing_field: 1,
                bad_timestamp: 1,
                bad_value: 1
            }
        );
        assert_eq!(series.events[1].stat2, Category::Integer(2));
    }

    #[test]
    fn status_requires_all_columns() {
        let err = read_status("Timestamp,Stat1,Value\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Stat2"));
    }

    #[test]
    fn fractional_status_timestamps_parse() {
        let ts = parse_status_timestamp("2024-01-01T10:00:02.250").unwrap();
        assert_eq!(ts.and_utc().timestamp_subsec_millis(), 250);
    }
}
