//! # Collector Loop
//!
//! Ties the pipeline together: restore the last snapshot, align the serial
//! stream, then repeatedly read a telegram, parse it, fold it into the
//! aggregates and persist the results until shutdown is requested.
//!
//! Read failures while streaming are retried. After
//! [`CollectorConfig::reopen_threshold`] consecutive failures the port is
//! cycled and the stream re-aligned, keeping the gas decision made at
//! startup. A re-alignment that exhausts its budget is fatal.

use crate::aggregate::engine::Aggregator;
use crate::aggregate::state::AggregateState;
use crate::constants::STREAM_REOPEN_THRESHOLD;
use crate::error::P1Error;
use crate::p1::alignment::{align, Aligner, AlignmentConfig};
use crate::p1::serial::LineSource;
use crate::p1::telegram::{parse_telegram, TelegramBuffer, TelegramProgress};
use crate::shutdown::ShutdownSignal;
use crate::snapshot::{PrimaryValues, SnapshotWriter};
use crate::util::logging::ThrottleManager;
use chrono::NaiveDateTime;
use log::{debug, error, info, warn};

const THROTTLE_WINDOW_MS: u64 = 60_000;
const THROTTLE_CAP: u32 = 5;
const READ_ERROR_CATEGORY: &str = "read_error";
const TELEGRAM_CATEGORY: &str = "telegram";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub alignment: AlignmentConfig,
    /// Consecutive failed reads while streaming before the port is cycled.
    pub reopen_threshold: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            alignment: AlignmentConfig::default(),
            reopen_threshold: STREAM_REOPEN_THRESHOLD,
        }
    }
}

/// Counters for one collector run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Complete telegrams received.
    pub telegrams: u64,
    /// Telegrams folded into the aggregates.
    pub readings: u64,
    /// Telegrams discarded as incomplete or oversized.
    pub skipped: u64,
    /// Failed line reads while streaming.
    pub read_errors: u64,
    /// Port cycles after repeated read failures.
    pub reconnects: u64,
}

type Clock = Box<dyn FnMut() -> NaiveDateTime + Send>;

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Runs the read/parse/aggregate/persist pipeline over a [`LineSource`].
pub struct Collector<S: LineSource> {
    source: S,
    config: CollectorConfig,
    writer: SnapshotWriter,
    shutdown: ShutdownSignal,
    clock: Clock,
    throttles: ThrottleManager,
    stats: CollectorStats,
    aggregator: Option<Aggregator>,
}

impl<S: LineSource> Collector<S> {
    pub fn new(
        source: S,
        config: CollectorConfig,
        writer: SnapshotWriter,
        shutdown: ShutdownSignal,
    ) -> Self {
        Collector {
            source,
            config,
            writer,
            shutdown,
            clock: Box::new(local_now),
            throttles: ThrottleManager::new(),
            stats: CollectorStats::default(),
            aggregator: None,
        }
    }

    /// Replace the wall clock used to timestamp readings.
    pub fn with_clock(mut self, clock: impl FnMut() -> NaiveDateTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn stats(&self) -> CollectorStats {
        self.stats
    }

    /// Aggregate state as of the last processed telegram, once streaming
    /// has started.
    pub fn state(&self) -> Option<&AggregateState> {
        self.aggregator.as_ref().map(Aggregator::state)
    }

    /// Run until shutdown (returns `Ok`) or a fatal error.
    pub async fn run(&mut self) -> Result<CollectorStats, P1Error> {
        let result = self.collect().await;
        if let Err(e) = self.source.close().await {
            warn!("Closing {} failed: {e}", self.source.name());
        }
        match result {
            Ok(()) | Err(P1Error::Cancelled) => {
                info!(
                    "Collector stopped: {} readings, {} skipped telegrams, {} reconnects",
                    self.stats.readings, self.stats.skipped, self.stats.reconnects
                );
                Ok(self.stats)
            }
            Err(e) => {
                error!("Collector failed: {e}");
                Err(e)
            }
        }
    }

    async fn collect(&mut self) -> Result<(), P1Error> {
        let state = self.writer.load_current((self.clock)());
        let outcome = align(&mut self.source, &self.config.alignment, &self.shutdown).await?;

        let mut aggregator = Aggregator::new(state, outcome.gas_present);
        let result = self.stream(&mut aggregator).await;
        self.aggregator = Some(aggregator);
        result
    }

    async fn stream(&mut self, aggregator: &mut Aggregator) -> Result<(), P1Error> {
        let gas_present = aggregator.gas_present();
        while !self.shutdown.is_triggered() {
            let Some(lines) = self.read_telegram(gas_present).await? else {
                break;
            };
            self.stats.telegrams += 1;
            self.process_telegram(aggregator, &lines);
        }
        Ok(())
    }

    /// Read lines up to and including the next sentinel.
    ///
    /// Returns `None` when shutdown is requested; a line that arrives after
    /// the request is discarded.
    async fn read_telegram(&mut self, gas_present: bool) -> Result<Option<Vec<String>>, P1Error> {
        let mut buffer = TelegramBuffer::new();
        let mut failures = 0u32;
        loop {
            if self.shutdown.is_triggered() {
                return Ok(None);
            }
            match self.source.read_line(self.config.alignment.read_timeout).await {
                Ok(_) if self.shutdown.is_triggered() => return Ok(None),
                Ok(line) => {
                    failures = 0;
                    match buffer.push(line) {
                        TelegramProgress::Incomplete => {}
                        TelegramProgress::Complete(lines) => return Ok(Some(lines)),
                        TelegramProgress::Overflow(dropped) => {
                            self.stats.skipped += 1;
                            warn!("Dropped {dropped} lines without a telegram sentinel");
                        }
                    }
                }
                Err(_) if self.shutdown.is_triggered() => {
                    info!("Reading from {} has been cancelled", self.source.name());
                    return Ok(None);
                }
                Err(e) => {
                    failures += 1;
                    self.stats.read_errors += 1;
                    if self
                        .throttles
                        .allow(READ_ERROR_CATEGORY, THROTTLE_WINDOW_MS, THROTTLE_CAP)
                    {
                        let suppressed = self.throttles.take_suppressed(READ_ERROR_CATEGORY);
                        warn!(
                            "Unable to read from {}: {e} ({failures} in a row, {suppressed} suppressed)",
                            self.source.name()
                        );
                    }
                    if failures >= self.config.reopen_threshold {
                        self.reconnect(gas_present).await?;
                        buffer.clear();
                        failures = 0;
                    }
                }
            }
        }
    }

    /// Parse, fold and persist one telegram. Returns whether it was folded.
    fn process_telegram(&mut self, aggregator: &mut Aggregator, lines: &[String]) -> bool {
        let timestamp = (self.clock)();
        let reading = match parse_telegram(lines, aggregator.gas_present(), timestamp) {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.skipped += 1;
                if self
                    .throttles
                    .allow(TELEGRAM_CATEGORY, THROTTLE_WINDOW_MS, THROTTLE_CAP)
                {
                    warn!("Skipping telegram: {e}");
                }
                return false;
            }
        };
        if self.shutdown.is_triggered() {
            debug!("Discarding reading parsed during shutdown");
            return false;
        }

        let triggers = aggregator.fold(&reading);
        self.stats.readings += 1;
        let state = aggregator.state();
        let primary = PrimaryValues::from_reading(&reading, state);
        self.writer.persist(&triggers, &primary, state);
        true
    }

    async fn reconnect(&mut self, gas_present: bool) -> Result<(), P1Error> {
        warn!(
            "{} consecutive read failures on {}; reopening",
            self.config.reopen_threshold,
            self.source.name()
        );
        self.stats.reconnects += 1;
        if let Err(e) = self.source.close().await {
            warn!("Closing {} failed: {e}", self.source.name());
        }
        tokio::select! {
            _ = tokio::time::sleep(self.config.alignment.backoff) => {}
            _ = self.shutdown.triggered() => return Err(P1Error::Cancelled),
        }
        Aligner::reconnecting(self.config.alignment.clone(), gas_present)
            .run(&mut self.source, &self.shutdown)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p1::mock::MockLineSource;
    use crate::snapshot::SnapshotPaths;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2013, 11, 18)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn collector(dir: &TempDir, source: MockLineSource) -> Collector<MockLineSource> {
        let writer = SnapshotWriter::new(SnapshotPaths::new(dir.path(), dir.path()), false);
        Collector::new(source, CollectorConfig::default(), writer, ShutdownSignal::new())
            .with_clock(clock)
    }

    #[tokio::test]
    async fn test_incomplete_telegram_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut collector = collector(&dir, MockLineSource::new());
        let mut aggregator = Aggregator::new(AggregateState::new(clock()), false);

        let lines: Vec<String> = ["/ISK5", "1-0:1.8.1(00001.000*kWh)", "!"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(!collector.process_telegram(&mut aggregator, &lines));
        assert_eq!(collector.stats().skipped, 1);
        assert_eq!(aggregator.state(), &AggregateState::new(clock()));
        assert!(!dir.path().join("data_0_0.json").exists());
    }

    #[tokio::test]
    async fn test_reading_after_shutdown_is_discarded() {
        let dir = TempDir::new().unwrap();
        let mut collector = collector(&dir, MockLineSource::new());
        let mut aggregator = Aggregator::new(AggregateState::new(clock()), false);
        collector.shutdown.trigger();

        let lines: Vec<String> = [
            "1-0:1.8.1(00001.000*kWh)",
            "1-0:1.8.2(00002.000*kWh)",
            "1-0:1.7.0(0000.50*kW)",
            "!",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert!(!collector.process_telegram(&mut aggregator, &lines));
        assert_eq!(collector.stats().readings, 0);
    }
}
