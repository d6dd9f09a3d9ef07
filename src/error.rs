//! # P1 Error Handling
//!
//! This module defines the P1Error enum, which represents the different error
//! types that can occur while collecting P1 telegrams.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Represents the different error types that can occur in the P1 collector.
#[derive(Debug, Error)]
pub enum P1Error {
    /// The serial port could not be opened.
    #[error("Serial port open error: {0}")]
    PortOpen(String),

    /// No line arrived within the read timeout.
    #[error("Serial read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// Reading from the serial port failed.
    #[error("Serial read error: {0}")]
    Read(String),

    /// No telegram boundary was found within the retry budget.
    #[error("Alignment failed after {attempts} attempts of {lines_per_attempt} lines")]
    AlignmentExhausted {
        attempts: u32,
        lines_per_attempt: u32,
    },

    /// The telegram lacked one or more mandatory registers.
    #[error("Incomplete telegram, missing: {}", missing.join(", "))]
    ParseIncomplete { missing: Vec<&'static str> },

    /// A register value window did not hold a decimal number.
    #[error("Invalid value for {field}: {raw:?}")]
    InvalidValue { field: &'static str, raw: String },

    /// Writing a snapshot file failed.
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O failure outside of snapshot writes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown was requested while an operation was in progress.
    #[error("Operation cancelled by shutdown request")]
    Cancelled,
}

impl P1Error {
    /// Errors that stop the collector.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            P1Error::PortOpen(_) | P1Error::AlignmentExhausted { .. } | P1Error::Config(_)
        )
    }

    /// Errors that are logged and retried on the next read or cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            P1Error::ReadTimeout(_)
                | P1Error::Read(_)
                | P1Error::ParseIncomplete { .. }
                | P1Error::InvalidValue { .. }
                | P1Error::Persistence { .. }
                | P1Error::Serialization(_)
        )
    }
}
