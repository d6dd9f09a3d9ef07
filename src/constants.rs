//! P1 Protocol Constants
//!
//! Register prefixes, value windows and the collector's fixed limits for the
//! DSMR-style telegram dialect read from the meter's P1 port.

/// Line that terminates every telegram
pub const P1_TELEGRAM_SENTINEL: &str = "!";

/// First character of the meter identification header line
pub const P1_HEADER_MARKER: char = '/';

/// Cumulative off-peak (tariff 1) energy register
pub const P1_REGISTER_ENERGY_OFF_PEAK: &str = "1-0:1.8.1";

/// Cumulative peak (tariff 2) energy register
pub const P1_REGISTER_ENERGY_PEAK: &str = "1-0:1.8.2";

/// Instantaneous power register
pub const P1_REGISTER_POWER_NOW: &str = "1-0:1.7.0";

/// Gas register; the value is carried on the following line
pub const P1_REGISTER_GAS: &str = "0-1:24.3.0";

// Value windows (character offsets within the matched line)
pub const P1_ENERGY_VALUE_WINDOW: (usize, usize) = (10, 19);
pub const P1_POWER_VALUE_WINDOW: (usize, usize) = (10, 17);
pub const P1_GAS_VALUE_WINDOW: (usize, usize) = (1, 10);

/// Scale from the meter's decimal units to stored milli-units
pub const MILLI_UNITS_PER_UNIT: i64 = 1000;

/// Hours tracked per day
pub const HOURS_PER_DAY: usize = 24;

/// Hourly total slots: one per hour plus the day-end carry slot
pub const HOURLY_TOTAL_SLOTS: usize = HOURS_PER_DAY + 1;

/// Index of the day-end carry slot in the hourly total lists
pub const DAY_END_SLOT: usize = HOURS_PER_DAY;

/// Capacity of the recent `energyNow` history
pub const RECENT_HISTORY_LEN: usize = 360;

/// Upper bound on the bytes of a single line
pub const MAX_LINE_BYTES: usize = 4096;

/// Upper bound on lines collected for a single telegram
pub const MAX_TELEGRAM_LINES: usize = 1024;

// Alignment retry defaults
pub const ALIGNMENT_LINE_BUDGET: u32 = 60;
pub const ALIGNMENT_MAX_ATTEMPTS: u32 = 10;
pub const ALIGNMENT_BACKOFF_MS: u64 = 1500;

/// Per-attempt serial read timeout in seconds
pub const SERIAL_READ_TIMEOUT_SECS: u64 = 20;

/// Consecutive failed reads while streaming before the port is reopened
pub const STREAM_REOPEN_THRESHOLD: u32 = 60;

/// Consecutive "current" snapshot failures that raise an alert
pub const PERSISTENCE_ALERT_THRESHOLD: u32 = 2;

// Snapshot file names
pub const CURRENT_SNAPSHOT_FILE: &str = "data_0_0.json";
pub const PRIMARY_SNAPSHOT_FILE: &str = "p1.json";

/// Timestamp format used in persisted snapshots
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
