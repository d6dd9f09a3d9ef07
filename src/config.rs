//! # Collector Configuration
//!
//! TOML configuration with three sections. Every key is optional:
//!
//! ```toml
//! [general]
//! log_dir = "/var/log/p1-rs"
//! main_data_dir = "/var/lib/p1-rs/data"
//! backup_main_data_dir = "/mnt/backup/p1-rs/data"
//! daily_data_dir = "/var/lib/p1-rs/daily"
//! write_primary_values_to_file = true
//! log_level = "info"
//!
//! [serial]
//! port = "/dev/ttyUSB0"
//! baudrate = 9600
//! data_bits = 7
//! parity = "even"
//! stop_bits = 1
//! read_timeout_secs = 20
//!
//! [alignment]
//! line_budget = 60
//! max_attempts = 10
//! backoff_ms = 1500
//! reopen_threshold = 60
//! ```

use crate::collector::CollectorConfig;
use crate::constants::{
    ALIGNMENT_BACKOFF_MS, ALIGNMENT_LINE_BUDGET, ALIGNMENT_MAX_ATTEMPTS,
    SERIAL_READ_TIMEOUT_SECS, STREAM_REOPEN_THRESHOLD,
};
use crate::error::P1Error;
use crate::p1::alignment::AlignmentConfig;
use crate::p1::serial::SerialConfig;
use crate::snapshot::SnapshotPaths;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_serial::{DataBits, Parity, StopBits};

/// Config file name looked up in the search directories.
pub const CONFIG_FILE_NAME: &str = "p1-rs.toml";

/// System-wide config directory.
pub const SYSTEM_CONFIG_DIR: &str = "/etc/p1-rs";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub general: GeneralConfig,
    pub serial: SerialSection,
    pub alignment: AlignmentSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Directory of the log file; stderr when unset.
    pub log_dir: Option<PathBuf>,
    pub main_data_dir: PathBuf,
    pub backup_main_data_dir: Option<PathBuf>,
    pub daily_data_dir: PathBuf,
    pub write_primary_values_to_file: bool,
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_dir: None,
            main_data_dir: PathBuf::from("/var/lib/p1-rs/data"),
            backup_main_data_dir: None,
            daily_data_dir: PathBuf::from("/var/lib/p1-rs/daily"),
            write_primary_values_to_file: false,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    None,
    Odd,
    Even,
}

impl From<ParitySetting> for Parity {
    fn from(parity: ParitySetting) -> Self {
        match parity {
            ParitySetting::None => Parity::None,
            ParitySetting::Odd => Parity::Odd,
            ParitySetting::Even => Parity::Even,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSection {
    pub port: String,
    pub baudrate: u32,
    pub data_bits: u8,
    pub parity: ParitySetting,
    pub stop_bits: u8,
    pub read_timeout_secs: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        SerialSection {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 9600,
            data_bits: 7,
            parity: ParitySetting::Even,
            stop_bits: 1,
            read_timeout_secs: SERIAL_READ_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlignmentSection {
    pub line_budget: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub reopen_threshold: u32,
}

impl Default for AlignmentSection {
    fn default() -> Self {
        AlignmentSection {
            line_budget: ALIGNMENT_LINE_BUDGET,
            max_attempts: ALIGNMENT_MAX_ATTEMPTS,
            backoff_ms: ALIGNMENT_BACKOFF_MS,
            reopen_threshold: STREAM_REOPEN_THRESHOLD,
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, P1Error> {
        let config: Config = toml::from_str(raw).map_err(|e| P1Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, P1Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| P1Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
            .map_err(|e| P1Error::Config(format!("{}: {e}", path.display())))
    }

    /// Load `explicit` if given, else the first config file found in the
    /// search path, else the defaults. Returns the file that was used.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), P1Error> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }
        let home = std::env::var_os("HOME").map(PathBuf::from);
        for candidate in search_paths(home.as_deref()) {
            if candidate.is_file() {
                return Ok((Self::from_file(&candidate)?, Some(candidate)));
            }
            debug!("No config at {}", candidate.display());
        }
        Ok((Config::default(), None))
    }

    pub fn validate(&self) -> Result<(), P1Error> {
        let serial = &self.serial;
        if serial.port.is_empty() {
            return Err(P1Error::Config("serial.port must not be empty".into()));
        }
        if serial.baudrate == 0 {
            return Err(P1Error::Config("serial.baudrate must be positive".into()));
        }
        if serial.read_timeout_secs == 0 {
            return Err(P1Error::Config(
                "serial.read_timeout_secs must be positive".into(),
            ));
        }
        data_bits(serial.data_bits)?;
        stop_bits(serial.stop_bits)?;
        if self.alignment.line_budget == 0 || self.alignment.max_attempts == 0 {
            return Err(P1Error::Config(
                "alignment.line_budget and alignment.max_attempts must be positive".into(),
            ));
        }
        if self.alignment.reopen_threshold == 0 {
            return Err(P1Error::Config(
                "alignment.reopen_threshold must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn serial_config(&self) -> Result<SerialConfig, P1Error> {
        Ok(SerialConfig {
            port: self.serial.port.clone(),
            baudrate: self.serial.baudrate,
            data_bits: data_bits(self.serial.data_bits)?,
            parity: self.serial.parity.into(),
            stop_bits: stop_bits(self.serial.stop_bits)?,
            read_timeout: Duration::from_secs(self.serial.read_timeout_secs),
        })
    }

    pub fn alignment_config(&self) -> AlignmentConfig {
        AlignmentConfig {
            line_budget: self.alignment.line_budget,
            max_attempts: self.alignment.max_attempts,
            backoff: Duration::from_millis(self.alignment.backoff_ms),
            read_timeout: Duration::from_secs(self.serial.read_timeout_secs),
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            alignment: self.alignment_config(),
            reopen_threshold: self.alignment.reopen_threshold,
        }
    }

    pub fn snapshot_paths(&self) -> SnapshotPaths {
        let paths = SnapshotPaths::new(
            &self.general.main_data_dir,
            &self.general.daily_data_dir,
        );
        match &self.general.backup_main_data_dir {
            Some(backup) => paths.with_backup(backup),
            None => paths,
        }
    }
}

/// Config file candidates in lookup order.
pub fn search_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(home) = home {
        paths.push(home.join(CONFIG_FILE_NAME));
    }
    paths.push(Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME));
    paths
}

fn data_bits(bits: u8) -> Result<DataBits, P1Error> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(P1Error::Config(format!(
            "serial.data_bits must be 5..=8, got {other}"
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<StopBits, P1Error> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(P1Error::Config(format!(
            "serial.stop_bits must be 1 or 2, got {other}"
        ))),
    }
}
