//! # Telegram Alignment
//!
//! The P1 port is a boundary-less byte stream: when the port is opened the
//! collector may land in the middle of a telegram. The [`Aligner`] reads
//! lines until it sees the `!` sentinel, which guarantees the next line
//! starts a full telegram, and decides once whether the meter reports gas.
//!
//! ```text
//! Disconnected --open--> Aligning --"!"--> Streaming
//!                           |                 ^
//!                           +--"!" (gas?)--> GasProbe --"!"--+
//! any state --budget exhausted x max_attempts--> Fatal
//! ```
//!
//! Each attempt may read at most `line_budget` lines (failed reads count).
//! An exhausted attempt closes the port, waits `backoff`, and reopens.

use crate::constants::{
    ALIGNMENT_BACKOFF_MS, ALIGNMENT_LINE_BUDGET, ALIGNMENT_MAX_ATTEMPTS, P1_REGISTER_GAS,
    P1_TELEGRAM_SENTINEL, SERIAL_READ_TIMEOUT_SECS,
};
use crate::error::P1Error;
use crate::p1::serial::LineSource;
use crate::shutdown::ShutdownSignal;
use log::{debug, error, info, warn};
use std::time::Duration;

/// Retry policy for alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentConfig {
    /// Line reads allowed per attempt before the port is cycled.
    pub line_budget: u32,
    /// Attempts before alignment fails fatally.
    pub max_attempts: u32,
    /// Delay between closing and reopening the port.
    pub backoff: Duration,
    /// Timeout for each line read.
    pub read_timeout: Duration,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            line_budget: ALIGNMENT_LINE_BUDGET,
            max_attempts: ALIGNMENT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(ALIGNMENT_BACKOFF_MS),
            read_timeout: Duration::from_secs(SERIAL_READ_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentState {
    Disconnected,
    Aligning,
    GasProbe,
    Streaming,
    Fatal,
}

/// What alignment established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentOutcome {
    pub gas_present: bool,
    /// Attempt number (1-based) that succeeded.
    pub attempts: u32,
    /// Line reads across all attempts, failed reads included.
    pub lines_read: u32,
}

/// Alignment/retry state machine.
#[derive(Debug)]
pub struct Aligner {
    config: AlignmentConfig,
    state: AlignmentState,
    gas: Option<bool>,
    scan_saw_gas: bool,
    attempt: u32,
    lines_this_attempt: u32,
    lines_total: u32,
    initial_open_fatal: bool,
}

impl Aligner {
    /// Create a state machine for startup. `known_gas` skips the gas check.
    pub fn new(config: AlignmentConfig, known_gas: Option<bool>) -> Self {
        Aligner {
            config,
            state: AlignmentState::Disconnected,
            gas: known_gas,
            scan_saw_gas: false,
            attempt: 0,
            lines_this_attempt: 0,
            lines_total: 0,
            initial_open_fatal: true,
        }
    }

    /// Create a state machine for re-aligning after the port was cycled
    /// while streaming: gas presence is already decided and a failed open
    /// costs an attempt instead of ending the process.
    pub fn reconnecting(config: AlignmentConfig, gas_present: bool) -> Self {
        Aligner {
            initial_open_fatal: false,
            ..Aligner::new(config, Some(gas_present))
        }
    }

    pub fn state(&self) -> AlignmentState {
        self.state
    }

    pub fn gas(&self) -> Option<bool> {
        self.gas
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Apply one received line to the state machine.
    pub fn on_line(&mut self, line: &str) -> AlignmentState {
        match self.state {
            AlignmentState::Aligning => {
                if line.starts_with(P1_REGISTER_GAS) && self.gas.is_none() {
                    info!("Gas register seen during alignment");
                    self.gas = Some(true);
                }
                if line == P1_TELEGRAM_SENTINEL {
                    info!("Data alignment done");
                    self.state = if self.gas.is_some() {
                        AlignmentState::Streaming
                    } else {
                        info!("Checking for gas ...");
                        self.scan_saw_gas = false;
                        AlignmentState::GasProbe
                    };
                }
            }
            AlignmentState::GasProbe => {
                if line.starts_with(P1_REGISTER_GAS) {
                    self.scan_saw_gas = true;
                }
                if line == P1_TELEGRAM_SENTINEL {
                    self.gas = Some(self.scan_saw_gas);
                    self.state = AlignmentState::Streaming;
                }
            }
            _ => {}
        }
        self.state
    }

    fn outcome(&self) -> AlignmentOutcome {
        AlignmentOutcome {
            gas_present: self.gas.unwrap_or(false),
            attempts: self.attempt,
            lines_read: self.lines_total,
        }
    }

    fn exhausted(&self) -> P1Error {
        P1Error::AlignmentExhausted {
            attempts: self.attempt,
            lines_per_attempt: self.config.line_budget,
        }
    }

    /// Drive `source` until the stream is aligned.
    ///
    /// Returns [`P1Error::Cancelled`] when `shutdown` fires, the open error
    /// when the very first open fails (startup only), and
    /// [`P1Error::AlignmentExhausted`] after `max_attempts` failed attempts.
    pub async fn run<S: LineSource + ?Sized>(
        &mut self,
        source: &mut S,
        shutdown: &ShutdownSignal,
    ) -> Result<AlignmentOutcome, P1Error> {
        info!(
            "Reading {} to align data (budget {} lines x {} attempts)",
            source.name(),
            self.config.line_budget,
            self.config.max_attempts
        );

        loop {
            if shutdown.is_triggered() {
                info!("Alignment cancelled by shutdown");
                return Err(P1Error::Cancelled);
            }

            match self.state {
                AlignmentState::Disconnected => {
                    self.attempt += 1;
                    self.lines_this_attempt = 0;
                    match source.open().await {
                        Ok(()) => {
                            debug!("Alignment attempt {} started", self.attempt);
                            self.state = AlignmentState::Aligning;
                        }
                        Err(e) if self.attempt == 1 && self.initial_open_fatal => {
                            error!("Error while opening {}: {e}", source.name());
                            self.state = AlignmentState::Fatal;
                            return Err(e);
                        }
                        Err(e) => {
                            warn!("Reopening {} failed: {e}", source.name());
                            self.fail_attempt(source, shutdown).await?;
                        }
                    }
                }
                AlignmentState::Aligning | AlignmentState::GasProbe => {
                    if self.lines_this_attempt >= self.config.line_budget {
                        warn!(
                            "No telegram boundary within {} lines on attempt {}",
                            self.config.line_budget, self.attempt
                        );
                        self.fail_attempt(source, shutdown).await?;
                        continue;
                    }

                    self.lines_this_attempt += 1;
                    self.lines_total += 1;
                    match source.read_line(self.config.read_timeout).await {
                        Ok(line) => {
                            if shutdown.is_triggered() {
                                info!("Alignment cancelled by shutdown");
                                return Err(P1Error::Cancelled);
                            }
                            debug!("Output from {}: {line}", source.name());
                            self.on_line(&line);
                        }
                        Err(_) if shutdown.is_triggered() => {
                            info!("Reading from {} has been cancelled", source.name());
                            return Err(P1Error::Cancelled);
                        }
                        Err(e) => {
                            warn!("Unable to read from {}: {e}", source.name());
                        }
                    }
                }
                AlignmentState::Streaming => {
                    let outcome = self.outcome();
                    info!(
                        "Aligned after {} attempt(s); gas is {}",
                        outcome.attempts,
                        if outcome.gas_present { "present" } else { "not present" }
                    );
                    return Ok(outcome);
                }
                AlignmentState::Fatal => return Err(self.exhausted()),
            }
        }
    }

    /// Close the port and either schedule the next attempt or go fatal.
    async fn fail_attempt<S: LineSource + ?Sized>(
        &mut self,
        source: &mut S,
        shutdown: &ShutdownSignal,
    ) -> Result<(), P1Error> {
        if let Err(e) = source.close().await {
            warn!("Closing {} failed: {e}", source.name());
        }

        if self.attempt >= self.config.max_attempts {
            self.state = AlignmentState::Fatal;
            let err = self.exhausted();
            error!("{err}; check the P1 cable and serial settings");
            return Err(err);
        }

        self.state = AlignmentState::Disconnected;
        tokio::select! {
            _ = tokio::time::sleep(self.config.backoff) => Ok(()),
            _ = shutdown.triggered() => Err(P1Error::Cancelled),
        }
    }
}

/// Convenience wrapper for the startup case.
pub async fn align<S: LineSource + ?Sized>(
    source: &mut S,
    config: &AlignmentConfig,
    shutdown: &ShutdownSignal,
) -> Result<AlignmentOutcome, P1Error> {
    Aligner::new(config.clone(), None).run(source, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aligning(known_gas: Option<bool>) -> Aligner {
        let mut aligner = Aligner::new(AlignmentConfig::default(), known_gas);
        aligner.state = AlignmentState::Aligning;
        aligner
    }

    #[test]
    fn test_sentinel_with_gas_seen_goes_straight_to_streaming() {
        let mut aligner = aligning(None);
        aligner.on_line("0-1:24.3.0(130101010000)(00)(60)(1)(0-1:24.2.1)(m3)");
        assert_eq!(aligner.on_line("!"), AlignmentState::Streaming);
        assert_eq!(aligner.gas(), Some(true));
    }

    #[test]
    fn test_sentinel_without_gas_enters_gas_check() {
        let mut aligner = aligning(None);
        aligner.on_line("1-0:1.7.0(0000.32*kW)");
        assert_eq!(aligner.on_line("!"), AlignmentState::GasProbe);
        assert_eq!(aligner.gas(), None);

        aligner.on_line("/ISK5ME382");
        aligner.on_line("1-0:1.8.1(00123.456*kWh)");
        assert_eq!(aligner.on_line("!"), AlignmentState::Streaming);
        assert_eq!(aligner.gas(), Some(false));
    }

    #[test]
    fn test_gas_check_detects_gas() {
        let mut aligner = aligning(None);
        aligner.on_line("!");
        aligner.on_line("0-1:24.3.0(130101010000)(00)(60)(1)(0-1:24.2.1)(m3)");
        aligner.on_line("(00012.345)");
        aligner.on_line("!");
        assert_eq!(aligner.gas(), Some(true));
    }

    #[test]
    fn test_known_gas_is_not_overridden() {
        let mut aligner = aligning(Some(false));
        aligner.on_line("0-1:24.3.0(130101010000)(00)(60)(1)(0-1:24.2.1)(m3)");
        assert_eq!(aligner.on_line("!"), AlignmentState::Streaming);
        assert_eq!(aligner.gas(), Some(false));
    }

    #[test]
    fn test_reconnecting_skips_gas_check() {
        let aligner = Aligner::reconnecting(AlignmentConfig::default(), true);
        assert_eq!(aligner.gas(), Some(true));
        assert!(!aligner.initial_open_fatal);
        assert_eq!(aligner.state(), AlignmentState::Disconnected);
    }

    #[test]
    fn test_default_policy() {
        let config = AlignmentConfig::default();
        assert_eq!(config.line_budget, 60);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.backoff, Duration::from_millis(1500));
        assert_eq!(config.read_timeout, Duration::from_secs(20));
    }
}
