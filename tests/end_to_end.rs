//! File-to-report integration tests.
//!
//! Each test writes trace / status CSVs into a temporary directory, loads
//! them through the public loader and runs the session pipeline.

use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use bead_monitor::config::{ChannelRef, EngineConfig, InputConfig, TraceLayout};
use bead_monitor::data::loader::{collect_trace_paths, load_status, load_trace};
use bead_monitor::data::model::{Bead, Category};
use bead_monitor::data::status::StatusSelection;
use bead_monitor::pipeline::bead_ranges;
use bead_monitor::state::{CacheStats, Session};
use bead_monitor::timeline::DayGap;

// =============================================================================
// Fixtures
// =============================================================================

fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

/// Two days of identified rows: day 1 at 10:00:00.. every 5 s, day 2 at
/// 08:00:00.. every 5 s. Channel 1 carries the reference bead pattern.
fn write_trace(dir: &Path, file: &str) {
    let pattern = [0.0, 0.0, 5.0, 6.0, 7.0, 0.0, 0.0, 8.0, 9.0, 0.0];
    let mut text = String::new();
    for (i, v) in pattern.iter().enumerate() {
        let (date, base) = if i < 5 { ("240101", 10 * 3600) } else { ("240102", 8 * 3600) };
        let secs = base + 5 * (i % 5);
        let time = format!("{:02}{:02}{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
        text.push_str(&format!("{time}_BM{date}Y0001_LINE_F1.csv,{v},{}\n", i * 10));
    }
    text.push_str("footer,0,0\n");
    fs::write(dir.join(file), text).unwrap();
}

fn write_status(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("status.csv");
    fs::write(
        &path,
        "Timestamp,Stat1,Stat2,Value\n\
         2024-01-01 10:00:05.400,ROBOT,1,11\n\
         2024-01-01 10:00:07.500,ROBOT,1,12\n\
         2024-01-02 08:00:00.000,ROBOT,1,13\n\
         2024-01-02 08:00:00.000,FEEDER,2,99\n\
         2024-01-02 09:00:00,ROBOT,1,14\n\
         2024-01-02 09:00:01,ROBOT,,15\n",
    )
    .unwrap();
    path
}

fn config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.segmentation.threshold = 1.0;
    cfg.smoothing.window = 2;
    cfg
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn directory_input_runs_every_trace() {
    let tmp = TempDir::new().unwrap();
    write_trace(tmp.path(), "b.csv");
    write_trace(tmp.path(), "a.csv");
    fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

    let paths = collect_trace_paths(&[tmp.path().to_path_buf()]).unwrap();
    let names: Vec<_> = paths
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["a.csv", "b.csv"]);

    let mut session = Session::new(config());
    for path in &paths {
        let source = load_trace(path, &session.config.input).unwrap();
        let report = session.analyze(source).unwrap();
        assert_eq!(bead_ranges(&report), vec![Bead::new(2, 4), Bead::new(7, 8)]);
        assert_eq!(report.parse.rows, 11);
        assert_eq!(report.parse.parsed, 10);
        assert_eq!(report.parse.malformed, 1);
    }
    assert_eq!(session.stats(), CacheStats { hits: 0, misses: 2 });
}

#[test]
fn day_boundary_compresses_to_one_step() {
    let tmp = TempDir::new().unwrap();
    write_trace(tmp.path(), "line.csv");
    let source = load_trace(&tmp.path().join("line.csv"), &InputConfig::default()).unwrap();

    let mut session = Session::new(config());
    let report = session.analyze(source).unwrap();
    let curve = &report.timeline.curves[0];
    assert_eq!(curve.points.len(), 10);
    // day 1 ends at 10:00:20, day 2 starts one 5 s step later
    assert_eq!(curve.points[4].compressed, at(1, 10, 0, 20));
    assert_eq!(curve.points[5].original, at(2, 8, 0, 0));
    assert_eq!(curve.points[5].compressed, at(1, 10, 0, 25));
    assert_eq!(report.timeline.days.len(), 2);
    assert_eq!(report.timeline.day_gap, DayGap::PreviousStep);
}

#[test]
fn collapse_policy_sums_day_spans() {
    let tmp = TempDir::new().unwrap();
    write_trace(tmp.path(), "line.csv");
    let source = load_trace(&tmp.path().join("line.csv"), &InputConfig::default()).unwrap();

    let mut cfg = config();
    cfg.timeline.day_gap = DayGap::Collapse;
    let mut session = Session::new(cfg);
    let report = session.analyze(source).unwrap();
    let pts = &report.timeline.curves[0].points;
    let span = pts[pts.len() - 1].compressed - pts[0].compressed;
    assert_eq!(span, chrono::Duration::seconds(40));
}

#[test]
fn status_overlay_from_file() {
    let tmp = TempDir::new().unwrap();
    write_trace(tmp.path(), "line.csv");
    let status_path = write_status(tmp.path());

    let series = load_status(&status_path).unwrap();
    assert_eq!(series.events.len(), 5);
    assert_eq!(series.skipped.missing_field, 1);

    let mut cfg = config();
    cfg.join.selection = StatusSelection::new(Some("ROBOT".into()), Some(Category::Integer(1)));
    cfg.join.tolerance_ms = 3000;
    let mut session = Session::new(cfg);
    session.set_status(series, false);

    let source = load_trace(&tmp.path().join("line.csv"), &session.config.input).unwrap();
    let report = session.analyze(source).unwrap();
    let overlay = report.status.expect("status overlay");
    assert_eq!(overlay.selected, 4);
    assert_eq!(overlay.joined.stats.matched, 3);
    assert_eq!(overlay.joined.stats.dropped, 1);

    let joined = &overlay.joined.events;
    assert_eq!(joined[0].matched, at(1, 10, 0, 5));
    assert_eq!(joined[0].error_ms, 400);
    // 10:00:07.5 is equidistant from :05 and :10
    assert_eq!(joined[1].matched, at(1, 10, 0, 5));
    assert_eq!(joined[2].compressed, at(1, 10, 0, 25));
}

#[test]
fn tabular_traces_without_identifiers() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("fit.csv");
    fs::write(&path, "Power,Current\n0,1\n3,1\n4,1\n0,1\n").unwrap();

    let mut cfg = config();
    cfg.input = InputConfig {
        layout: TraceLayout::Tabular,
        identifier_column: None,
    };
    cfg.segmentation.channel = ChannelRef::Name("Power".into());
    let source = load_trace(&path, &cfg.input).unwrap();

    let mut session = Session::new(cfg);
    let report = session.analyze(source).unwrap();
    assert_eq!(bead_ranges(&report), vec![Bead::new(1, 2)]);
    assert_eq!(report.parse.rows, 0);
    assert!(report.timeline.days.is_empty());
    assert_eq!(report.beads[0].channels[1].raw, vec![1.0, 1.0]);
}

#[test]
fn config_file_drives_the_run() {
    let tmp = TempDir::new().unwrap();
    write_trace(tmp.path(), "line.csv");
    let cfg_path = tmp.path().join("engine.yaml");
    fs::write(
        &cfg_path,
        "segmentation:\n  threshold: 6.5\n\
         smoothing:\n  window: 4\n\
         filter:\n  kind: median\n  window: 3\n",
    )
    .unwrap();

    let cfg = EngineConfig::from_yaml(&cfg_path).unwrap();
    let source = load_trace(&tmp.path().join("line.csv"), &cfg.input).unwrap();
    let mut session = Session::new(cfg);
    let report = session.analyze(source).unwrap();
    assert_eq!(bead_ranges(&report), vec![Bead::new(4, 4), Bead::new(7, 8)]);
    assert_eq!(report.filter, "Median");
    assert_eq!(report.beads[1].channels[0].filtered, vec![8.5, 8.5]);
}

#[test]
fn unreadable_identifiers_fail_the_source() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.csv");
    fs::write(&path, "x,1\ny,2\n").unwrap();
    let source = load_trace(&path, &InputConfig::default()).unwrap();
    let err = Session::default().analyze(source).unwrap_err();
    assert!(err.to_string().contains("none of the 2 record identifiers"));
}
