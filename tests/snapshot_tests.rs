//! Integration tests for snapshot files and data directory bootstrap.

use chrono::{NaiveDate, NaiveDateTime};
use p1_rs::aggregate::{AggregateState, Aggregator};
use p1_rs::p1::telegram::Reading;
use p1_rs::snapshot::{PrimaryValues, SnapshotPaths, SnapshotWriter};
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

fn monday(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2013, 11, 18)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn reading(timestamp: NaiveDateTime, energy_now: i64) -> Reading {
    Reading {
        timestamp,
        energy_now,
        energy_total_off_peak: 5_000,
        energy_total_peak: 1_000,
        gas_total: None,
    }
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

/// Tests that a missing main directory is restored from the backup.
#[test]
fn test_bootstrap_restores_backup() {
    let root = TempDir::new().unwrap();
    let backup = root.path().join("backup");
    fs::create_dir_all(backup.join("nested")).unwrap();
    fs::write(backup.join("data_0_0.json"), "{}").unwrap();
    fs::write(backup.join("nested").join("keep.txt"), "x").unwrap();

    let main = root.path().join("main");
    let daily = root.path().join("daily");
    let paths = SnapshotPaths::new(&main, &daily).with_backup(&backup);
    paths.bootstrap().unwrap();

    assert_eq!(fs::read_to_string(main.join("data_0_0.json")).unwrap(), "{}");
    assert!(main.join("nested").join("keep.txt").is_file());
    assert!(daily.is_dir());
}

/// Tests that bootstrap creates empty directories without a backup.
#[test]
fn test_bootstrap_creates_directories() {
    let root = TempDir::new().unwrap();
    let main = root.path().join("a").join("main");
    let daily = root.path().join("b").join("daily");
    let paths = SnapshotPaths::new(&main, &daily).with_backup(root.path().join("nope"));
    paths.bootstrap().unwrap();

    assert!(main.is_dir());
    assert!(daily.is_dir());
    assert_eq!(fs::read_dir(&main).unwrap().count(), 0);
}

/// Tests that an hour and day rollover writes every snapshot file.
#[test]
fn test_rollover_writes_hourly_daily_primary_and_current() {
    let root = TempDir::new().unwrap();
    let paths = SnapshotPaths::new(root.path().join("main"), root.path().join("daily"));
    paths.bootstrap().unwrap();
    let mut writer = SnapshotWriter::new(paths.clone(), true);

    let mut agg = Aggregator::new(AggregateState::new(monday(23, 0)), false);
    for r in [reading(monday(23, 30), 400), reading(monday(23, 59), 900)] {
        let triggers = agg.fold(&r);
        writer.persist(&triggers, &PrimaryValues::from_reading(&r, agg.state()), agg.state());
    }
    let tuesday = NaiveDate::from_ymd_opt(2013, 11, 19)
        .unwrap()
        .and_hms_opt(0, 0, 30)
        .unwrap();
    let r = reading(tuesday, 250);
    let triggers = agg.fold(&r);
    writer.persist(&triggers, &PrimaryValues::from_reading(&r, agg.state()), agg.state());

    let hourly = read_json(&paths.hourly(1, 24));
    assert_eq!(hourly["currentHour"], 23);
    assert_eq!(hourly["eHourlyTotalList"][24], 6_000);
    assert_eq!(hourly["eLastHourList"].as_array().unwrap().len(), 360);

    let daily = read_json(&paths.daily(NaiveDate::from_ymd_opt(2013, 11, 18).unwrap()));
    assert!(daily.get("eLastHourList").is_none());
    assert_eq!(daily["eDayMax"], 900);

    let current = read_json(&paths.current());
    assert_eq!(current["currentDay"], 2);
    assert_eq!(current["eNow"], 250);
    assert_eq!(current["timestamp"], "2013-11-19 00:00:30");
    assert!(current.get("gasTotal").is_none());

    let primary = read_json(&paths.primary());
    assert_eq!(
        primary,
        serde_json::json!({
            "eNow": 250,
            "eTotalOffPeak": 5000,
            "eTotalPeak": 1000,
            "timestamp": "2013-11-19 00:00:30",
        })
    );
}

/// Tests that snapshot files are written with lexicographically sorted keys.
#[test]
fn test_current_snapshot_keys_sorted() {
    let root = TempDir::new().unwrap();
    let paths = SnapshotPaths::new(root.path(), root.path());
    let mut writer = SnapshotWriter::new(paths.clone(), false);
    writer.write_current(&AggregateState::new(monday(9, 0))).unwrap();

    let raw = fs::read_to_string(paths.current()).unwrap();
    let positions: Vec<usize> = ["\"currentDay\"", "\"eDayMax\"", "\"eNow\"", "\"timestamp\""]
        .iter()
        .map(|key| raw.find(key).unwrap())
        .collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted);
    assert!(!paths.primary().exists());
}

/// Tests that a restart restores the state written by a previous run.
#[test]
fn test_restart_restores_current_snapshot() {
    let root = TempDir::new().unwrap();
    let paths = SnapshotPaths::new(root.path(), root.path());
    let mut writer = SnapshotWriter::new(paths.clone(), false);

    let mut agg = Aggregator::new(AggregateState::new(monday(9, 0)), true);
    let mut r = reading(monday(9, 15), 420);
    r.gas_total = Some(3_210);
    agg.fold(&r);
    writer.write_current(agg.state()).unwrap();

    let restored = SnapshotWriter::new(paths, false).load_current(monday(18, 0));
    assert_eq!(&restored, agg.state());
    assert_eq!(restored.current_hour, 9);
}
