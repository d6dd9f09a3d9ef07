//! # P1 Serial Line Source
//!
//! This module provides the line-oriented view of the meter's P1 port:
//! opening and closing the serial device and reading one ASCII line at a
//! time with a per-attempt timeout.

use crate::constants::{MAX_LINE_BYTES, SERIAL_READ_TIMEOUT_SECS};
use crate::error::P1Error;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

/// Source of newline-terminated telegram lines.
///
/// Implemented by [`SerialLineSource`] for real hardware and by
/// [`crate::p1::mock::MockLineSource`] for tests.
#[async_trait::async_trait]
pub trait LineSource: Send {
    /// Open the underlying port.
    async fn open(&mut self) -> Result<(), P1Error>;

    /// Read one line with trailing whitespace stripped.
    ///
    /// Fails with [`P1Error::ReadTimeout`] when nothing arrived within
    /// `timeout` and with [`P1Error::Read`] on I/O failure.
    async fn read_line(&mut self, timeout: Duration) -> Result<String, P1Error>;

    /// Close the port. Closing an already closed port is not an error.
    async fn close(&mut self) -> Result<(), P1Error>;

    /// Human readable identity used in log messages.
    fn name(&self) -> &str;
}

/// Configuration for the P1 serial connection.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    /// DSMR 2.2 settings: 9600 baud, 7 data bits, even parity, 1 stop bit.
    fn default() -> Self {
        SerialConfig {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 9600,
            data_bits: DataBits::Seven,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_secs(SERIAL_READ_TIMEOUT_SECS),
        }
    }
}

/// Line source backed by a `tokio_serial::SerialStream`.
pub struct SerialLineSource {
    config: SerialConfig,
    reader: Option<BufReader<tokio_serial::SerialStream>>,
    // Bytes of a line that was still incomplete when a read timed out.
    pending: Vec<u8>,
}

impl SerialLineSource {
    pub fn new(config: SerialConfig) -> Self {
        SerialLineSource {
            config,
            reader: None,
            pending: Vec::new(),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

#[async_trait::async_trait]
impl LineSource for SerialLineSource {
    async fn open(&mut self) -> Result<(), P1Error> {
        let port = tokio_serial::new(&self.config.port, self.config.baudrate)
            .data_bits(self.config.data_bits)
            .parity(self.config.parity)
            .stop_bits(self.config.stop_bits)
            .flow_control(FlowControl::None)
            .timeout(self.config.read_timeout)
            .open_native_async()
            .map_err(|e| P1Error::PortOpen(format!("{}: {e}", self.config.port)))?;

        log::debug!(
            "Opened {} at {} baud ({:?}, {:?}, {:?})",
            self.config.port,
            self.config.baudrate,
            self.config.data_bits,
            self.config.parity,
            self.config.stop_bits
        );
        self.pending.clear();
        self.reader = Some(BufReader::new(port));
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, P1Error> {
        let Self {
            reader, pending, ..
        } = self;
        let reader = reader
            .as_mut()
            .ok_or_else(|| P1Error::Read("port is not open".into()))?;
        read_capped_line(reader, pending, timeout).await
    }

    async fn close(&mut self) -> Result<(), P1Error> {
        // SerialStream has no close method; dropping it releases the port
        self.reader = None;
        self.pending.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.port
    }
}

/// Read one newline-terminated line into `pending`, at most
/// [`MAX_LINE_BYTES`] long.
///
/// Partial data stays in `pending` when the timeout fires, so the next call
/// continues the same line. A line that reaches the cap without a newline is
/// dropped.
pub(crate) async fn read_capped_line<R>(
    reader: &mut R,
    pending: &mut Vec<u8>,
    timeout: Duration,
) -> Result<String, P1Error>
where
    R: AsyncBufRead + Unpin,
{
    let remaining = MAX_LINE_BYTES.saturating_sub(pending.len()) as u64;
    let mut limited = (&mut *reader).take(remaining);
    match tokio::time::timeout(timeout, limited.read_until(b'\n', pending)).await {
        Err(_) => Err(P1Error::ReadTimeout(timeout)),
        Ok(Err(e)) => Err(P1Error::Read(e.to_string())),
        Ok(Ok(_)) if pending.len() >= MAX_LINE_BYTES && !pending.ends_with(b"\n") => {
            pending.clear();
            Err(P1Error::Read(format!(
                "no line terminator within {MAX_LINE_BYTES} bytes"
            )))
        }
        Ok(Ok(0)) => Err(P1Error::Read("end of stream".into())),
        Ok(Ok(_)) => {
            let line = normalize_line(pending);
            pending.clear();
            Ok(line)
        }
    }
}

/// Decode raw line bytes as text and strip trailing whitespace (CR/LF).
pub fn normalize_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end().to_string()
}
