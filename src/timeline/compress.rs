use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Day-boundary policy
// ---------------------------------------------------------------------------

/// How much of an inter-day gap survives compression.
///
/// The whole span between the last record of one day and the first of the
/// next is removed; the policy decides what single step is put back in its
/// place. The step never exceeds the gap it replaces, so compression never
/// stretches the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayGap {
    /// One step equal to the latest positive intra-day interval (1 s before
    /// any has been seen).
    #[default]
    PreviousStep,
    /// No step at all: the first record of a day lands on the last record of
    /// the previous one.
    Collapse,
    /// A fixed step.
    Fixed { millis: u64 },
}

impl DayGap {
    /// Step put back in place of a `gap` that crossed midnight.
    fn step(&self, last_interval: Option<Duration>, gap: Duration) -> Duration {
        let step = match *self {
            DayGap::PreviousStep => last_interval.unwrap_or_else(|| Duration::seconds(1)),
            DayGap::Collapse => Duration::zero(),
            DayGap::Fixed { millis } => {
                Duration::try_milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
                    .unwrap_or(Duration::MAX)
            }
        };
        step.min(gap)
    }
}

// ---------------------------------------------------------------------------
// TimelineMap
// ---------------------------------------------------------------------------

/// Original timestamp → gap-compressed timestamp for one source.
///
/// Keys are the distinct original timestamps in ascending order. Built once,
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineMap {
    keys: Vec<NaiveDateTime>,
    compressed: Vec<NaiveDateTime>,
    day_gap: DayGap,
}

/// First and last record of one calendar day, before and after compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaySpan {
    pub date: NaiveDate,
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
    pub compressed_first: NaiveDateTime,
    pub compressed_last: NaiveDateTime,
}

impl TimelineMap {
    /// Build the map from timestamps in any order; duplicates collapse onto
    /// one key.
    pub fn build<I>(timestamps: I, day_gap: DayGap) -> Self
    where
        I: IntoIterator<Item = NaiveDateTime>,
    {
        let mut keys: Vec<NaiveDateTime> = timestamps.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();

        let mut compressed = Vec::with_capacity(keys.len());
        let mut offset = Duration::zero();
        let mut last_interval: Option<Duration> = None;
        let mut prev: Option<NaiveDateTime> = None;

        for &ts in &keys {
            if let Some(p) = prev {
                let delta = ts - p;
                if ts.date() != p.date() {
                    offset = offset + (delta - day_gap.step(last_interval, delta));
                } else {
                    last_interval = Some(delta);
                }
            }
            compressed.push(ts - offset);
            prev = Some(ts);
        }

        log::debug!(
            "timeline: {} distinct timestamps, {} removed across day boundaries",
            keys.len(),
            offset
        );
        TimelineMap {
            keys,
            compressed,
            day_gap,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn day_gap(&self) -> DayGap {
        self.day_gap
    }

    /// Original timestamps, ascending.
    pub fn keys(&self) -> &[NaiveDateTime] {
        &self.keys
    }

    /// Compressed value of `keys()[index]`.
    pub fn compressed_at(&self, index: usize) -> Option<NaiveDateTime> {
        self.compressed.get(index).copied()
    }

    /// Compressed value for an original timestamp, if it is a key.
    pub fn compress(&self, ts: NaiveDateTime) -> Option<NaiveDateTime> {
        self.keys
            .binary_search(&ts)
            .ok()
            .map(|i| self.compressed[i])
    }

    /// `(original, compressed)` pairs in key order.
    pub fn entries(&self) -> impl Iterator<Item = (NaiveDateTime, NaiveDateTime)> + '_ {
        self.keys.iter().copied().zip(self.compressed.iter().copied())
    }

    /// One entry per calendar day present, in order.
    pub fn day_spans(&self) -> Vec<DaySpan> {
        let mut spans: Vec<DaySpan> = Vec::new();
        for (orig, comp) in self.entries() {
            match spans.last_mut() {
                Some(span) if span.date == orig.date() => {
                    span.last = orig;
                    span.compressed_last = comp;
                }
                _ => spans.push(DaySpan {
                    date: orig.date(),
                    first: orig,
                    last: orig,
                    compressed_first: comp,
                    compressed_last: comp,
                }),
            }
        }
        spans
    }

    /// Distance from the first to the last compressed timestamp.
    pub fn compressed_span(&self) -> Duration {
        match (self.compressed.first(), self.compressed.last()) {
            (Some(a), Some(b)) => *b - *a,
            _ => Duration::zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: (i32, u32, u32), time: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, time.2)
            .unwrap()
    }

    fn three_day_trace() -> Vec<NaiveDateTime> {
        vec![
            at((2024, 3, 4), (9, 0, 0)),
            at((2024, 3, 4), (9, 0, 2)),
            at((2024, 3, 4), (9, 0, 4)),
            at((2024, 3, 5), (13, 30, 0)),
            at((2024, 3, 5), (13, 30, 3)),
            at((2024, 3, 7), (6, 0, 0)),
            at((2024, 3, 7), (6, 10, 0)),
        ]
    }

    #[test]
    fn day_boundary_keeps_one_step() {
        let d1a = at((2024, 1, 1), (10, 0, 0));
        let d1b = at((2024, 1, 1), (10, 0, 5));
        let d2 = at((2024, 1, 2), (8, 0, 0));
        let map = TimelineMap::build([d2, d1a, d1b], DayGap::default());

        assert_eq!(map.compress(d1a), Some(d1a));
        assert_eq!(map.compress(d1b), Some(d1b));
        assert_eq!(map.compress(d2), Some(at((2024, 1, 1), (10, 0, 10))));
    }

    #[test]
    fn first_day_with_a_single_record_uses_one_second() {
        let a = at((2024, 1, 1), (23, 0, 0));
        let b = at((2024, 1, 2), (1, 0, 0));
        let map = TimelineMap::build([a, b], DayGap::PreviousStep);
        assert_eq!(map.compress(b), Some(at((2024, 1, 1), (23, 0, 1))));
    }

    #[test]
    fn compressed_values_strictly_increase() {
        for gap in [DayGap::PreviousStep, DayGap::Fixed { millis: 250 }] {
            let map = TimelineMap::build(three_day_trace(), gap);
            let values: Vec<_> = map.entries().map(|(_, c)| c).collect();
            assert!(values.windows(2).all(|w| w[0] < w[1]), "{gap:?}");
        }
    }

    #[test]
    fn per_day_spans_are_preserved() {
        for gap in [
            DayGap::PreviousStep,
            DayGap::Collapse,
            DayGap::Fixed { millis: 1500 },
        ] {
            let map = TimelineMap::build(three_day_trace(), gap);
            let spans = map.day_spans();
            assert_eq!(spans.len(), 3);
            for s in spans {
                assert_eq!(s.last - s.first, s.compressed_last - s.compressed_first);
            }
        }
    }

    #[test]
    fn collapse_total_span_is_sum_of_days() {
        let map = TimelineMap::build(three_day_trace(), DayGap::Collapse);
        let per_day: Duration = map
            .day_spans()
            .iter()
            .fold(Duration::zero(), |acc, s| acc + (s.last - s.first));
        assert_eq!(map.compressed_span(), per_day);
        // 4 s + 3 s + 10 min
        assert_eq!(per_day, Duration::seconds(607));
    }

    #[test]
    fn fixed_gap_adds_exactly_its_step() {
        let map = TimelineMap::build(three_day_trace(), DayGap::Fixed { millis: 1500 });
        assert_eq!(
            map.compressed_span(),
            Duration::seconds(607) + Duration::milliseconds(3000)
        );
    }

    #[test]
    fn step_never_exceeds_the_overnight_gap() {
        let a = at((2024, 1, 1), (0, 0, 0));
        let b = at((2024, 1, 1), (23, 59, 0));
        let c = at((2024, 1, 2), (0, 0, 30));
        let map = TimelineMap::build([a, b, c], DayGap::PreviousStep);
        // the 23:59 interval is longer than the 90 s overnight gap, which is kept as is
        assert_eq!(map.compress(c), Some(c));
        assert_eq!(map.compressed_span(), c - a);
    }

    #[test]
    fn huge_fixed_step_is_bounded_by_the_gap() {
        let map = TimelineMap::build(
            three_day_trace(),
            DayGap::Fixed {
                millis: 10_000_000_000_000_000,
            },
        );
        let trace = three_day_trace();
        for ts in &trace {
            assert_eq!(map.compress(*ts), Some(*ts));
        }
        let map = TimelineMap::build(trace.clone(), DayGap::Fixed { millis: u64::MAX });
        assert_eq!(map.compressed_span(), trace[6] - trace[0]);
    }

    #[test]
    fn compressed_span_never_exceeds_original() {
        for gap in [
            DayGap::PreviousStep,
            DayGap::Collapse,
            DayGap::Fixed { millis: 3_600_000 },
        ] {
            let trace = three_day_trace();
            let map = TimelineMap::build(trace.clone(), gap);
            assert!(map.compressed_span() <= trace[6] - trace[0], "{gap:?}");
            for (orig, comp) in map.entries() {
                assert!(comp <= orig, "{gap:?}");
            }
        }
    }

    #[test]
    fn duplicates_and_unknown_timestamps() {
        let t = at((2024, 1, 1), (10, 0, 0));
        let map = TimelineMap::build([t, t, t], DayGap::default());
        assert_eq!(map.len(), 1);
        assert_eq!(map.compress(t), Some(t));
        assert_eq!(map.compress(at((2024, 1, 1), (10, 0, 1))), None);
    }

    #[test]
    fn empty_map() {
        let map = TimelineMap::build(Vec::new(), DayGap::default());
        assert!(map.is_empty());
        assert!(map.day_spans().is_empty());
        assert_eq!(map.compressed_span(), Duration::zero());
    }

    #[test]
    fn day_gap_deserializes_from_config_words() {
        let g: DayGap = serde_yaml::from_str("collapse").unwrap();
        assert_eq!(g, DayGap::Collapse);
        let g: DayGap = serde_json::from_str(r#"{"fixed":{"millis":500}}"#).unwrap();
        assert_eq!(g, DayGap::Fixed { millis: 500 });
    }
}
