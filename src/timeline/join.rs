use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use super::compress::TimelineMap;
use crate::data::model::{Category, StatusEvent};

/// A status event placed on a compressed timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedEvent {
    /// Event timestamp as recorded.
    pub original: NaiveDateTime,
    /// Timeline key it was matched to.
    pub matched: NaiveDateTime,
    /// Compressed value of `matched`.
    pub compressed: NaiveDateTime,
    /// `|original - matched|` in milliseconds.
    pub error_ms: i64,
    pub stat1: Category,
    pub stat2: Category,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub events: usize,
    pub matched: usize,
    /// Nearest key further away than the tolerance (or no keys at all).
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinOutcome {
    pub events: Vec<JoinedEvent>,
    pub stats: JoinStats,
}

/// Index of the key closest to `ts`, with its distance. Ties go to the
/// earlier key.
pub fn nearest_key(keys: &[NaiveDateTime], ts: NaiveDateTime) -> Option<(usize, Duration)> {
    let idx = keys.partition_point(|k| *k < ts);
    let before = idx.checked_sub(1).map(|i| (i, ts - keys[i]));
    let after = keys.get(idx).map(|k| (idx, *k - ts));
    match (before, after) {
        (Some(b), Some(a)) => Some(if b.1 <= a.1 { b } else { a }),
        (b, a) => b.or(a),
    }
}

/// Attach each event to its nearest timeline key, dropping those further than
/// `tolerance` away. Output keeps the input order.
pub fn join(map: &TimelineMap, events: &[StatusEvent], tolerance: Duration) -> JoinOutcome {
    let keys = map.keys();
    let mut joined = Vec::with_capacity(events.len());

    for ev in events {
        let Some((idx, diff)) = nearest_key(keys, ev.timestamp) else {
            continue;
        };
        if diff > tolerance {
            continue;
        }
        let Some(compressed) = map.compressed_at(idx) else {
            continue;
        };
        joined.push(JoinedEvent {
            original: ev.timestamp,
            matched: keys[idx],
            compressed,
            error_ms: diff.num_milliseconds(),
            stat1: ev.stat1.clone(),
            stat2: ev.stat2.clone(),
            value: ev.value,
        });
    }

    let stats = JoinStats {
        events: events.len(),
        matched: joined.len(),
        dropped: events.len() - joined.len(),
    };
    if stats.dropped > 0 {
        log::debug!(
            "join: {} of {} status events beyond {} ms",
            stats.dropped,
            stats.events,
            tolerance.num_milliseconds()
        );
    }
    JoinOutcome {
        events: joined,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::DayGap;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    fn event(ts: NaiveDateTime, value: f64) -> StatusEvent {
        StatusEvent {
            timestamp: ts,
            stat1: Category::Integer(1),
            stat2: Category::Text("run".into()),
            value,
        }
    }

    fn map() -> TimelineMap {
        TimelineMap::build([t(10, 0, 0, 0), t(10, 0, 2, 0), t(10, 0, 4, 0)], DayGap::default())
    }

    #[test]
    fn exact_match_has_zero_error() {
        let out = join(&map(), &[event(t(10, 0, 2, 0), 7.0)], Duration::seconds(1));
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].matched, t(10, 0, 2, 0));
        assert_eq!(out.events[0].error_ms, 0);
        assert_eq!(out.events[0].value, 7.0);
    }

    #[test]
    fn equidistant_prefers_earlier_key() {
        let (idx, diff) = nearest_key(map().keys(), t(10, 0, 1, 0)).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(diff, Duration::seconds(1));
    }

    #[test]
    fn beyond_tolerance_is_dropped() {
        let events = [
            event(t(9, 59, 58, 0), 1.0),  // 2 s before the first key
            event(t(10, 0, 4, 900), 2.0), // 0.9 s after the last
            event(t(10, 0, 3, 0), 3.0),   // tie, within tolerance
        ];
        let out = join(&map(), &events, Duration::seconds(1));
        assert_eq!(
            out.stats,
            JoinStats {
                events: 3,
                matched: 2,
                dropped: 1
            }
        );
        assert_eq!(out.events[0].matched, t(10, 0, 4, 0));
        assert_eq!(out.events[0].error_ms, 900);
        assert_eq!(out.events[1].matched, t(10, 0, 2, 0));
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let out = join(&map(), &[event(t(10, 0, 5, 0), 1.0)], Duration::seconds(1));
        assert_eq!(out.stats.matched, 1);
    }

    #[test]
    fn events_take_the_compressed_time_of_their_key() {
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let m = TimelineMap::build([t(10, 0, 0, 0), t(10, 0, 5, 0), day2], DayGap::default());
        let ev = event(day2 + Duration::milliseconds(300), 4.0);
        let out = join(&m, &[ev], Duration::seconds(1));
        assert_eq!(out.events[0].compressed, t(10, 0, 10, 0));
        assert_eq!(out.events[0].original, day2 + Duration::milliseconds(300));
    }

    #[test]
    fn empty_timeline_drops_everything() {
        let empty = TimelineMap::build(Vec::new(), DayGap::default());
        let out = join(&empty, &[event(t(10, 0, 0, 0), 1.0)], Duration::hours(1));
        assert!(out.events.is_empty());
        assert_eq!(out.stats.dropped, 1);
        assert!(nearest_key(&[], t(0, 0, 0, 0)).is_none());
    }
}
