use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::model::{Category, StatusEvent};

// ---------------------------------------------------------------------------
// Status selection: which Stat1 / Stat2 pair is overlaid
// ---------------------------------------------------------------------------

/// Stat1 / Stat2 selection applied to the status series before joining.
/// A `None` field means "no constraint" on that column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSelection {
    #[serde(default)]
    pub stat1: Option<Category>,
    #[serde(default)]
    pub stat2: Option<Category>,
}

impl StatusSelection {
    pub fn new(stat1: Option<Category>, stat2: Option<Category>) -> Self {
        StatusSelection { stat1, stat2 }
    }

    /// Whether an event passes both column constraints.
    pub fn matches(&self, event: &StatusEvent) -> bool {
        self.stat1.as_ref().map_or(true, |s| *s == event.stat1)
            && self.stat2.as_ref().map_or(true, |s| *s == event.stat2)
    }

    /// Default the selection the way the dashboards do: the Stat1 value of
    /// the first event, then the first Stat2 value seen with it.
    pub fn first_available(events: &[StatusEvent]) -> Self {
        let stat1 = events.first().map(|e| e.stat1.clone());
        let stat2 = stat1.as_ref().and_then(|s1| {
            events
                .iter()
                .find(|e| e.stat1 == *s1)
                .map(|e| e.stat2.clone())
        });
        StatusSelection { stat1, stat2 }
    }
}

/// Distinct values in order of first appearance.
fn unique<'a>(values: impl Iterator<Item = &'a Category>) -> Vec<Category> {
    let mut seen = HashSet::new();
    values.filter(|v| seen.insert(*v)).cloned().collect()
}

/// Distinct Stat1 values, in order of first appearance.
pub fn stat1_options(events: &[StatusEvent]) -> Vec<Category> {
    unique(events.iter().map(|e| &e.stat1))
}

/// Distinct Stat2 values among events whose Stat1 equals `stat1`, in order of
/// first appearance.
pub fn stat2_options(events: &[StatusEvent], stat1: &Category) -> Vec<Category> {
    unique(events.iter().filter(|e| e.stat1 == *stat1).map(|e| &e.stat2))
}

/// Clone out the events that pass the selection.
pub fn select(events: &[StatusEvent], selection: &StatusSelection) -> Vec<StatusEvent> {
    events
        .iter()
        .filter(|e| selection.matches(e))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ev(sec: u32, s1: &str, s2: i64, value: f64) -> StatusEvent {
        StatusEvent {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(10, 0, sec)
                .unwrap(),
            stat1: Category::from(s1),
            stat2: Category::from(s2),
            value,
        }
    }

    fn events() -> Vec<StatusEvent> {
        vec![
            ev(0, "ROBOT", 2, 1.0),
            ev(1, "FEEDER", 1, 2.0),
            ev(2, "ROBOT", 1, 3.0),
            ev(3, "ROBOT", 2, 4.0),
        ]
    }

    fn values(events: &[StatusEvent]) -> Vec<f64> {
        events.iter().map(|e| e.value).collect()
    }

    #[test]
    fn options_keep_first_seen_order() {
        let evs = events();
        assert_eq!(
            stat1_options(&evs),
            vec![Category::from("ROBOT"), Category::from("FEEDER")]
        );
        assert_eq!(
            stat2_options(&evs, &Category::from("ROBOT")),
            vec![Category::from(2i64), Category::from(1i64)]
        );
        assert_eq!(
            stat2_options(&evs, &Category::from("FEEDER")),
            vec![Category::from(1i64)]
        );
        assert!(stat2_options(&evs, &Category::from("NONE")).is_empty());
    }

    #[test]
    fn empty_selection_passes_everything() {
        let evs = events();
        let all = select(&evs, &StatusSelection::default());
        assert_eq!(values(&all), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn selection_requires_both_columns() {
        let evs = events();
        let sel = StatusSelection::new(Some("ROBOT".into()), Some(2i64.into()));
        assert_eq!(values(&select(&evs, &sel)), vec![1.0, 4.0]);
    }

    #[test]
    fn first_available_follows_first_seen_order() {
        let evs = vec![
            ev(0, "ROBOT", 2, 1.0),
            ev(1, "ROBOT", 1, 2.0),
            ev(2, "FEEDER", 5, 3.0),
        ];
        let sel = StatusSelection::first_available(&evs);
        assert_eq!(sel.stat1, Some(Category::from("ROBOT")));
        assert_eq!(sel.stat2, Some(Category::from(2i64)));

        let sel = StatusSelection::first_available(&events()[1..]);
        assert_eq!(sel.stat1, Some(Category::from("FEEDER")));
        assert_eq!(sel.stat2, Some(Category::from(1i64)));
        assert_eq!(
            StatusSelection::first_available(&[]),
            StatusSelection::default()
        );
    }
}
