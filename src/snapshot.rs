//! # Snapshot Persistence
//!
//! Writes the aggregate state to JSON files other tools read:
//!
//! | When | File |
//! |---|---|
//! | every reading | `<main>/data_0_0.json` |
//! | every reading (optional) | `<main>/p1.json` |
//! | hour rollover | `<main>/data_<weekday>_<hour+1>.json` |
//! | day rollover | `<daily>/data_<YYYY>_<MM>_<DD>.json` (no recent history) |
//!
//! Every file is replaced atomically: the document is written to a sibling
//! `.tmp` file, synced and renamed over the target, so readers never see a
//! torn document.

use crate::aggregate::engine::SnapshotTrigger;
use crate::aggregate::state::{AggregateState, GAS_TOTAL_KEY};
use crate::constants::{
    CURRENT_SNAPSHOT_FILE, PERSISTENCE_ALERT_THRESHOLD, PRIMARY_SNAPSHOT_FILE, TIMESTAMP_FORMAT,
};
use crate::error::P1Error;
use crate::p1::telegram::Reading;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory layout of the snapshot files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub main_data_dir: PathBuf,
    pub daily_data_dir: PathBuf,
    /// Copied into place when `main_data_dir` is missing at startup.
    pub backup_main_data_dir: Option<PathBuf>,
}

impl SnapshotPaths {
    pub fn new(main_data_dir: impl Into<PathBuf>, daily_data_dir: impl Into<PathBuf>) -> Self {
        SnapshotPaths {
            main_data_dir: main_data_dir.into(),
            daily_data_dir: daily_data_dir.into(),
            backup_main_data_dir: None,
        }
    }

    pub fn with_backup(mut self, backup: impl Into<PathBuf>) -> Self {
        self.backup_main_data_dir = Some(backup.into());
        self
    }

    pub fn current(&self) -> PathBuf {
        self.main_data_dir.join(CURRENT_SNAPSHOT_FILE)
    }

    pub fn primary(&self) -> PathBuf {
        self.main_data_dir.join(PRIMARY_SNAPSHOT_FILE)
    }

    /// Hourly snapshot for ISO weekday `day` and the hour that just ended,
    /// counted 1..=24.
    pub fn hourly(&self, day: u32, hour: u32) -> PathBuf {
        self.main_data_dir.join(format!("data_{day}_{hour}.json"))
    }

    pub fn daily(&self, date: NaiveDate) -> PathBuf {
        self.daily_data_dir
            .join(format!("data_{}.json", date.format("%Y_%m_%d")))
    }

    /// Prepare the data directories.
    ///
    /// A missing main directory is restored from the backup directory when
    /// one is configured and exists, and created empty otherwise.
    pub fn bootstrap(&self) -> Result<(), P1Error> {
        if !self.main_data_dir.exists() {
            match &self.backup_main_data_dir {
                Some(backup) if backup.is_dir() => {
                    info!(
                        "Restoring {} from backup {}",
                        self.main_data_dir.display(),
                        backup.display()
                    );
                    copy_dir_recursive(backup, &self.main_data_dir)?;
                }
                _ => {
                    info!("Creating data directory {}", self.main_data_dir.display());
                    fs::create_dir_all(&self.main_data_dir)?;
                }
            }
        }
        if !self.daily_data_dir.exists() {
            info!("Creating daily data directory {}", self.daily_data_dir.display());
            fs::create_dir_all(&self.daily_data_dir)?;
        }
        Ok(())
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<(), P1Error> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Latest raw register values, written to `p1.json` for lightweight
/// consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryValues {
    pub timestamp: NaiveDateTime,
    pub energy_now: i64,
    pub energy_total_off_peak: i64,
    pub energy_total_peak: i64,
    /// Only present in runs with a gas meter; `Some(None)` until the first
    /// gas value arrives.
    pub gas_total: Option<Option<i64>>,
}

impl PrimaryValues {
    /// Primary values after `reading` was folded into `state`. The gas total
    /// is the carried one, so a telegram without gas does not blank it.
    pub fn from_reading(reading: &Reading, state: &AggregateState) -> Self {
        PrimaryValues {
            timestamp: reading.timestamp,
            energy_now: reading.energy_now,
            energy_total_off_peak: reading.energy_total_off_peak,
            energy_total_peak: reading.energy_total_peak,
            gas_total: state.has_gas().then_some(state.gas_total),
        }
    }

    pub fn to_document(&self) -> BTreeMap<String, Value> {
        let mut document = BTreeMap::new();
        document.insert(
            "timestamp".to_string(),
            Value::from(self.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        );
        document.insert("eNow".to_string(), Value::from(self.energy_now));
        document.insert("eTotalOffPeak".to_string(), Value::from(self.energy_total_off_peak));
        document.insert("eTotalPeak".to_string(), Value::from(self.energy_total_peak));
        if let Some(gas) = self.gas_total {
            document.insert(GAS_TOTAL_KEY.to_string(), gas.map_or(Value::Null, Value::from));
        }
        document
    }
}

/// Replace `path` with `document` atomically.
pub fn write_json_atomic(path: &Path, document: &BTreeMap<String, Value>) -> Result<(), P1Error> {
    let bytes = serde_json::to_vec(document)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).map_err(|e| P1Error::Persistence {
        path: path.to_path_buf(),
        source: e,
    })?;
    let written = file
        .write_all(&bytes)
        .and_then(|()| file.sync_all())
        .and_then(|()| {
            drop(file);
            fs::rename(&tmp, path)
        });
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            debug!("Could not remove {}: {cleanup}", tmp.display());
        }
        return Err(P1Error::Persistence {
            path: path.to_path_buf(),
            source: e,
        });
    }
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Persists snapshots and tracks failures of the "current" file.
#[derive(Debug)]
pub struct SnapshotWriter {
    paths: SnapshotPaths,
    write_primary: bool,
    current_failures: u32,
    alerted: bool,
}

impl SnapshotWriter {
    pub fn new(paths: SnapshotPaths, write_primary: bool) -> Self {
        SnapshotWriter {
            paths,
            write_primary,
            current_failures: 0,
            alerted: false,
        }
    }

    pub fn paths(&self) -> &SnapshotPaths {
        &self.paths
    }

    /// Consecutive failed writes of the current snapshot.
    pub fn consecutive_current_failures(&self) -> u32 {
        self.current_failures
    }

    /// Load the last current snapshot, or start fresh when there is none or
    /// it cannot be read.
    pub fn load_current(&self, now: NaiveDateTime) -> AggregateState {
        let path = self.paths.current();
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) => {
                warn!("No previous snapshot at {} ({e}); starting fresh", path.display());
                return AggregateState::new(now);
            }
        };
        match AggregateState::from_json(&json, now) {
            Ok(state) => {
                info!("Restored state from {}", path.display());
                state
            }
            Err(e) => {
                warn!("Ignoring unreadable snapshot {}: {e}", path.display());
                AggregateState::new(now)
            }
        }
    }

    /// Write everything one reading produced: rollover snapshots first, then
    /// the primary values, then the current state.
    ///
    /// Failures are logged and do not stop the remaining writes.
    pub fn persist(
        &mut self,
        triggers: &[SnapshotTrigger],
        primary: &PrimaryValues,
        state: &AggregateState,
    ) {
        for trigger in triggers {
            if let Err(e) = self.write_trigger(trigger) {
                warn!("{e}");
            }
        }
        if self.write_primary {
            if let Err(e) = self.write_primary(primary) {
                warn!("{e}");
            }
        }
        if let Err(e) = self.write_current(state) {
            warn!("{e}");
        }
    }

    pub fn write_trigger(&self, trigger: &SnapshotTrigger) -> Result<(), P1Error> {
        match trigger {
            SnapshotTrigger::Hourly { day, hour, state } => {
                let path = self.paths.hourly(*day, *hour);
                info!("Writing hourly snapshot {}", path.display());
                write_json_atomic(&path, &state.to_document(true)?)
            }
            SnapshotTrigger::Daily { date, state } => {
                let path = self.paths.daily(*date);
                info!("Writing daily snapshot {}", path.display());
                write_json_atomic(&path, &state.to_document(false)?)
            }
        }
    }

    pub fn write_primary(&self, primary: &PrimaryValues) -> Result<(), P1Error> {
        write_json_atomic(&self.paths.primary(), &primary.to_document())
    }

    /// Write the current snapshot, raising an alert once per failure streak
    /// of [`PERSISTENCE_ALERT_THRESHOLD`] or more.
    pub fn write_current(&mut self, state: &AggregateState) -> Result<(), P1Error> {
        let result = state
            .to_document(true)
            .and_then(|document| write_json_atomic(&self.paths.current(), &document));
        match &result {
            Ok(()) => {
                if self.current_failures > 0 {
                    info!(
                        "Current snapshot written again after {} failure(s)",
                        self.current_failures
                    );
                }
                self.current_failures = 0;
                self.alerted = false;
            }
            Err(_) => {
                self.current_failures += 1;
                if self.current_failures >= PERSISTENCE_ALERT_THRESHOLD && !self.alerted {
                    error!(
                        "ALERT: {} consecutive failures writing {}; snapshots are stale",
                        self.current_failures,
                        self.paths.current().display()
                    );
                    self.alerted = true;
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2013, 11, 18)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_file_names() {
        let paths = SnapshotPaths::new("/data", "/daily");
        assert_eq!(paths.current(), PathBuf::from("/data/data_0_0.json"));
        assert_eq!(paths.primary(), PathBuf::from("/data/p1.json"));
        assert_eq!(paths.hourly(1, 24), PathBuf::from("/data/data_1_24.json"));
        assert_eq!(
            paths.daily(NaiveDate::from_ymd_opt(2013, 11, 4).unwrap()),
            PathBuf::from("/daily/data_2013_11_04.json")
        );
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let mut document = BTreeMap::new();
        document.insert("b".to_string(), Value::from(2));
        document.insert("a".to_string(), Value::from(1));

        write_json_atomic(&path, &document).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"a":1,"b":2}"#);
        assert!(!dir.path().join("out.json.tmp").exists());
    }

    #[test]
    fn test_write_into_missing_dir_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.json");
        let err = write_json_atomic(&path, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, P1Error::Persistence { .. }));
    }

    #[test]
    fn test_failed_rename_removes_tmp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();

        let err = write_json_atomic(&path, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, P1Error::Persistence { .. }));
        assert!(!dir.path().join("out.json.tmp").exists());
        assert!(path.is_dir());
    }

    #[test]
    fn test_load_current_falls_back_to_fresh_state() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(SnapshotPaths::new(dir.path(), dir.path()), false);
        let state = writer.load_current(now());
        assert_eq!(state, AggregateState::new(now()));

        fs::write(writer.paths().current(), "not json").unwrap();
        assert_eq!(writer.load_current(now()), AggregateState::new(now()));
    }

    #[test]
    fn test_current_failure_streak_resets_on_success() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("main");
        let mut writer = SnapshotWriter::new(SnapshotPaths::new(&main, dir.path()), false);
        let state = AggregateState::new(now());

        assert!(writer.write_current(&state).is_err());
        assert!(writer.write_current(&state).is_err());
        assert_eq!(writer.consecutive_current_failures(), 2);
        assert!(writer.alerted);

        fs::create_dir_all(&main).unwrap();
        writer.write_current(&state).unwrap();
        assert_eq!(writer.consecutive_current_failures(), 0);
        assert!(!writer.alerted);
    }

    #[test]
    fn test_primary_document_gas_keys() {
        let reading = Reading {
            timestamp: now(),
            energy_now: 320,
            energy_total_off_peak: 1000,
            energy_total_peak: 2000,
            gas_total: None,
        };
        let mut state = AggregateState::new(now());
        let without_gas = PrimaryValues::from_reading(&reading, &state).to_document();
        assert!(!without_gas.contains_key(GAS_TOTAL_KEY));
        assert_eq!(without_gas["timestamp"], Value::from("2013-11-18 09:00:00"));

        state.gas_hourly_total = Some(Default::default());
        let gas_pending = PrimaryValues::from_reading(&reading, &state).to_document();
        assert_eq!(gas_pending[GAS_TOTAL_KEY], Value::Null);

        state.gas_total = Some(4321);
        let with_gas = PrimaryValues::from_reading(&reading, &state).to_document();
        assert_eq!(with_gas[GAS_TOTAL_KEY], Value::from(4321));
    }
}
