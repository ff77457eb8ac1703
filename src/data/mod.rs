/// Data layer: core types, identifier parsing, loading, and status selection.
///
/// Architecture:
/// ```text
///  trace .csv (file or directory)        status .csv
///        │                                    │
///        ▼                                    ▼
///   ┌──────────┐                        ┌──────────┐
///   │  loader   │  → TraceSource         │  loader   │  → StatusSeries
///   └──────────┘                        └──────────┘     (+ skip counts)
///        │                                    │
///        ▼                                    ▼
///   ┌────────────┐                      ┌──────────┐
///   │ identifier  │  row id → timestamp  │  status   │  Stat1 / Stat2 selection
///   └────────────┘                      └──────────┘
/// ```

pub mod identifier;
pub mod loader;
pub mod model;
pub mod status;
