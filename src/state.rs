use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use log::debug;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::data::loader::StatusSeries;
use crate::data::model::TraceSource;
use crate::data::status::StatusSelection;
use crate::pipeline::{self, EngineError, PreparedSource, SourceReport};
use crate::timeline::DayGap;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Identity of a prepared source: its label, a fingerprint of its contents
/// and the day-gap policy the timeline was built with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceKey {
    name: String,
    fingerprint: u64,
    day_gap: DayGap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

/// Working state of one analysis session, independent of any front end.
///
/// Parsing identifiers and compressing the timeline only depend on the file
/// contents, so they are done once per source and reused while threshold,
/// window, filter or status selection change.
pub struct Session {
    /// Active parameters.
    pub config: EngineConfig,

    /// Status series overlaid on every source, if loaded.
    pub status: Option<StatusSeries>,

    prepared: HashMap<SourceKey, PreparedSource>,
    stats: CacheStats,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            status: None,
            prepared: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Install a status series. With `select_first`, the Stat1 / Stat2
    /// selection is reset to the first available pair.
    pub fn set_status(&mut self, series: StatusSeries, select_first: bool) {
        if select_first {
            self.config.join.selection = StatusSelection::first_available(&series.events);
            debug!("status selection defaulted to {:?}", self.config.join.selection);
        }
        self.status = Some(series);
    }

    /// Prepared form of `source`, from the cache when its contents were seen
    /// before under the current day-gap policy.
    pub fn prepare(&mut self, source: TraceSource) -> Result<&PreparedSource, EngineError> {
        let key = self.prepare_key(source)?;
        Ok(&self.prepared[&key])
    }

    /// Prepare (or reuse) `source` and run the analysis with the current
    /// parameters and status series.
    pub fn analyze(&mut self, source: TraceSource) -> Result<SourceReport, EngineError> {
        let key = self.prepare_key(source)?;
        pipeline::analyze(&self.prepared[&key], &self.config, self.status.as_ref())
    }

    fn prepare_key(&mut self, source: TraceSource) -> Result<SourceKey, EngineError> {
        let key = SourceKey {
            name: source.name.clone(),
            fingerprint: fingerprint(&source),
            day_gap: self.config.timeline.day_gap,
        };
        if self.prepared.contains_key(&key) {
            self.stats.hits += 1;
            debug!("{}: reusing prepared timeline", key.name);
        } else {
            self.stats.misses += 1;
            self.evict_stale(&key);
            let prepared = pipeline::prepare(source, key.day_gap)?;
            self.prepared.insert(key.clone(), prepared);
        }
        Ok(key)
    }

    /// Drop entries for the same source name whose contents differ from
    /// `key`, so a reloaded file does not keep its old versions alive.
    fn evict_stale(&mut self, key: &SourceKey) {
        let before = self.prepared.len();
        self.prepared.retain(|k, _| k.name != key.name || k.fingerprint == key.fingerprint);
        let evicted = before - self.prepared.len();
        if evicted > 0 {
            debug!("{}: evicted {evicted} stale prepared timelines", key.name);
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of prepared sources held.
    pub fn cached(&self) -> usize {
        self.prepared.len()
    }

    /// Drop every prepared source.
    pub fn clear(&mut self) {
        self.prepared.clear();
    }
}

/// Content hash over identifiers, channel names and sample bit patterns.
fn fingerprint(source: &TraceSource) -> u64 {
    let mut h = DefaultHasher::new();
    source.identifiers.hash(&mut h);
    for channel in &source.channels {
        channel.name.hash(&mut h);
        channel.samples.len().hash(&mut h);
        for v in &channel.samples {
            v.to_bits().hash(&mut h);
        }
    }
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Category, StatusEvent};

    fn source(scale: f64) -> TraceSource {
        let ids: Vec<String> = (0..6)
            .map(|i| format!("12000{i}_240315Y0002_X_F2.csv"))
            .collect();
        let rows: Vec<Vec<f64>> = [0.0, 2.0, 3.0, 0.0, 4.0, 0.0]
            .iter()
            .map(|v| vec![v * scale])
            .collect();
        TraceSource::from_rows("line.csv", vec!["Ch 01".into()], Some(ids), &rows)
    }

    #[test]
    fn parameter_changes_reuse_the_prepared_source() {
        let mut session = Session::default();
        session.config.segmentation.threshold = 1.0;
        session.config.smoothing.window = 2;

        let a = session.analyze(source(1.0)).unwrap();
        assert_eq!(a.beads.len(), 2);

        session.config.segmentation.threshold = 3.5;
        let b = session.analyze(source(1.0)).unwrap();
        assert_eq!(b.beads.len(), 1);

        assert_eq!(session.stats(), CacheStats { hits: 1, misses: 1 });
        assert_eq!(session.cached(), 1);
    }

    #[test]
    fn changed_contents_or_day_gap_miss() {
        let mut session = Session::default();
        session.prepare(source(1.0)).unwrap();
        session.config.timeline.day_gap = DayGap::Collapse;
        session.prepare(source(1.0)).unwrap();
        assert_eq!(session.stats(), CacheStats { hits: 0, misses: 2 });
        // both day-gap variants of the same contents stay cached
        assert_eq!(session.cached(), 2);

        session.prepare(source(2.0)).unwrap();
        assert_eq!(session.stats(), CacheStats { hits: 0, misses: 3 });
        assert_eq!(session.cached(), 1);

        session.clear();
        assert_eq!(session.cached(), 0);
    }

    #[test]
    fn reloaded_source_replaces_its_stale_versions() {
        let mut session = Session::default();
        let mut other = source(1.0);
        other.name = "other.csv".into();
        session.prepare(other).unwrap();
        for scale in [1.0, 2.0, 3.0, 4.0] {
            session.prepare(source(scale)).unwrap();
        }
        assert_eq!(session.cached(), 2);
        assert_eq!(session.stats().misses, 5);

        // the latest version is still a hit
        session.prepare(source(4.0)).unwrap();
        assert_eq!(session.stats().hits, 1);
    }

    #[test]
    fn failed_preparation_is_not_cached() {
        let mut session = Session::default();
        let mut bad = source(1.0);
        bad.identifiers = Some(vec!["nope".into(); 6]);
        assert!(session.prepare(bad).is_err());
        assert_eq!(session.cached(), 0);
        assert_eq!(session.stats().misses, 1);
    }

    #[test]
    fn status_selection_can_default_to_first_pair() {
        let at = |s: u32| {
            chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(12, 0, s)
                .unwrap()
        };
        let series = StatusSeries {
            events: vec![
                StatusEvent {
                    timestamp: at(1),
                    stat1: Category::from("B"),
                    stat2: Category::from(7i64),
                    value: 1.0,
                },
                StatusEvent {
                    timestamp: at(2),
                    stat1: Category::from("A"),
                    stat2: Category::from(9i64),
                    value: 2.0,
                },
            ],
            skipped: Default::default(),
        };
        let mut session = Session::default();
        session.set_status(series, true);
        assert_eq!(
            session.config.join.selection,
            StatusSelection::new(Some("B".into()), Some(7i64.into()))
        );

        let report = session.analyze(source(1.0)).unwrap();
        let overlay = report.status.unwrap();
        assert_eq!(overlay.selected, 1);
        assert_eq!(overlay.joined.events[0].value, 1.0);
    }
}
