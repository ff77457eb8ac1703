/// Gap-compressed time axis and status alignment.
///
/// ```text
///   parsed row timestamps ──► compress::TimelineMap  (original → compressed)
///                                    │
///   status events ──────────────► join  nearest key within tolerance
///                                    │
///                                    ▼
///                          Vec<JoinedEvent> on the compressed axis
/// ```

pub mod compress;
pub mod join;

pub use compress::{DayGap, DaySpan, TimelineMap};
pub use join::{join, JoinOutcome, JoinStats, JoinedEvent};
