//! # p1-rs - A Rust Crate for Collecting P1 Smart-Meter Telegrams
//!
//! The p1-rs crate reads the DSMR-style telegram stream a utility smart meter
//! emits on its P1 serial port, aggregates the energy and gas registers into
//! hourly, daily and recent-history views, and persists them as JSON
//! snapshots for other tools to pick up.
//!
//! ## Features
//!
//! - Line-oriented serial access with bounded, cancel-safe reads
//! - Telegram alignment with a line budget and reopen/backoff retries
//! - Exact fixed-point parsing of register values (milli-units)
//! - Hour and day rollover with hourly, daily and current snapshots
//! - Atomic snapshot writes with sorted keys
//! - Cooperative shutdown and logging through the `log` facade
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! p1-rs = "1.0.0"
//! ```
//!
//! ```rust
//! use chrono::NaiveDate;
//! use p1_rs::parse_telegram;
//!
//! let lines = [
//!     "/ISk5\\2ME382-1003",
//!     "1-0:1.8.1(00123.456*kWh)",
//!     "1-0:1.8.2(00200.000*kWh)",
//!     "1-0:1.7.0(0000.32*kW)",
//!     "!",
//! ];
//! let now = NaiveDate::from_ymd_opt(2013, 11, 18)
//!     .unwrap()
//!     .and_hms_opt(9, 0, 0)
//!     .unwrap();
//! let reading = parse_telegram(&lines, false, now).unwrap();
//! assert_eq!(reading.energy_total_off_peak, 123456);
//! ```

pub mod aggregate;
pub mod collector;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod p1;
pub mod shutdown;
pub mod snapshot;
pub mod util;

pub use crate::error::P1Error;
pub use crate::logging::{init_logger_with_level, log_error, log_info};

pub use aggregate::{AggregateState, Aggregator, RecentHistory, SnapshotTrigger};
pub use collector::{Collector, CollectorConfig, CollectorStats};
pub use config::Config;
pub use p1::{
    align, parse_telegram, Aligner, AlignmentConfig, AlignmentOutcome, AlignmentState,
    LineSource, Reading, SerialConfig, SerialLineSource,
};
pub use shutdown::ShutdownSignal;
pub use snapshot::{PrimaryValues, SnapshotPaths, SnapshotWriter};
