use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Record identifier grammar
// ---------------------------------------------------------------------------

/// `<HHMMSS>_<CODE>_<free tags>_<F#>[_<status>].csv`
const IDENTIFIER_PATTERN: &str =
    r"(?P<time>\d{6})_(?P<code>[A-Z0-9]+)_.*?_(?P<feed>F\d+)(?:_(?P<tag>[^.]+))?\.csv";

/// The calendar date sits inside the code block as `YYMMDD` + `Y` + 4 digits.
const DATE_PATTERN: &str = r"(\d{6})Y\d{4}";

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern is valid"))
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DATE_PATTERN).expect("date pattern is valid"))
}

/// Why an identifier produced no timestamp.
///
/// These are ordinary outcomes, not faults: the row is dropped from every
/// timestamp-dependent structure and counted in the source's parse report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier does not match <time>_<code>_..._<F#>.csv: {0:?}")]
    Malformed(String),

    #[error("code block {code:?} carries no YYMMDD date")]
    MissingDate { code: String },

    #[error("{date}{time} is not a valid calendar timestamp")]
    InvalidTimestamp { date: String, time: String },
}

/// Everything extracted from one record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordId {
    pub timestamp: NaiveDateTime,
    /// Alphanumeric block that embeds the date, e.g. `240101Y0001`.
    pub code: String,
    /// Feed tag, e.g. `F1`.
    pub feed: String,
    /// Optional trailing status tag before the extension.
    pub tag: Option<String>,
}

impl RecordId {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Parse a record identifier such as `093015_240101Y0001_X_F1.csv`.
pub fn parse_identifier(identifier: &str) -> Result<RecordId, IdentifierError> {
    let caps = identifier_regex()
        .captures(identifier)
        .ok_or_else(|| IdentifierError::Malformed(identifier.to_string()))?;

    // All three groups are mandatory in the pattern.
    let time = &caps["time"];
    let code = &caps["code"];
    let feed = &caps["feed"];
    let tag = caps.name("tag").map(|m| m.as_str().to_string());

    let date = date_regex()
        .captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| IdentifierError::MissingDate {
            code: code.to_string(),
        })?;

    let timestamp = NaiveDateTime::parse_from_str(&format!("{date}{time}"), "%y%m%d%H%M%S")
        .map_err(|_| IdentifierError::InvalidTimestamp {
            date: date.to_string(),
            time: time.to_string(),
        })?;

    Ok(RecordId {
        timestamp,
        code: code.to_string(),
        feed: feed.to_string(),
        tag,
    })
}

/// Convenience wrapper returning only the timestamp.
pub fn parse_timestamp(identifier: &str) -> Result<NaiveDateTime, IdentifierError> {
    parse_identifier(identifier).map(|id| id.timestamp)
}
