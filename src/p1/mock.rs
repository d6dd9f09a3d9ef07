//! Mock line source implementation for testing
//!
//! This module provides a scripted line source that can be used to test the
//! alignment state machine and the collector without a meter attached.

use crate::error::P1Error;
use crate::p1::serial::LineSource;
use crate::shutdown::ShutdownSignal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted outcome of a `read_line` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// Deliver a line.
    Line(String),
    /// Fail with a read timeout.
    Timeout,
    /// Fail with an I/O error.
    Error(String),
    /// Trigger the attached shutdown signal, then deliver the line if any
    /// (an in-flight read completing after shutdown) or fail with a timeout.
    Shutdown(Option<String>),
}

/// Counters recorded by the mock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub opens: u32,
    pub failed_opens: u32,
    pub closes: u32,
    pub reads: u32,
    pub lines_served: u32,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockEvent>,
    // Replayed in order once `script` is empty.
    cycle: Vec<MockEvent>,
    cycle_pos: usize,
    open_failures: u32,
    is_open: bool,
    stats: MockStats,
    shutdown: Option<ShutdownSignal>,
}

/// Mock line source with a shared script so a clone can inspect it after the
/// source has been moved into a collector.
#[derive(Debug, Clone, Default)]
pub struct MockLineSource {
    state: Arc<Mutex<MockState>>,
}

impl MockLineSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single line.
    pub fn push_line(&self, line: impl Into<String>) {
        self.push_event(MockEvent::Line(line.into()));
    }

    /// Queue several lines.
    pub fn push_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().unwrap();
        state
            .script
            .extend(lines.into_iter().map(|l| MockEvent::Line(l.into())));
    }

    pub fn push_timeout(&self) {
        self.push_event(MockEvent::Timeout);
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.push_event(MockEvent::Error(message.into()));
    }

    /// Queue a shutdown request that fires when this event is read.
    pub fn push_shutdown(&self, line: Option<String>) {
        self.push_event(MockEvent::Shutdown(line));
    }

    pub fn push_event(&self, event: MockEvent) {
        self.state.lock().unwrap().script.push_back(event);
    }

    /// Replay `events` forever once the script is exhausted.
    pub fn set_cycle(&self, events: Vec<MockEvent>) {
        let mut state = self.state.lock().unwrap();
        state.cycle = events;
        state.cycle_pos = 0;
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.state.lock().unwrap().open_failures = count;
    }

    /// Signal triggered by [`MockEvent::Shutdown`].
    pub fn attach_shutdown(&self, signal: ShutdownSignal) {
        self.state.lock().unwrap().shutdown = Some(signal);
    }

    pub fn stats(&self) -> MockStats {
        self.state.lock().unwrap().stats
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().is_open
    }

    /// Number of scripted events not yet consumed.
    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap().script.len()
    }
}

#[async_trait::async_trait]
impl LineSource for MockLineSource {
    async fn open(&mut self) -> Result<(), P1Error> {
        let mut state = self.state.lock().unwrap();
        if state.open_failures > 0 {
            state.open_failures -= 1;
            state.stats.failed_opens += 1;
            return Err(P1Error::PortOpen("mock: simulated open failure".into()));
        }
        state.is_open = true;
        state.stats.opens += 1;
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, P1Error> {
        let mut state = self.state.lock().unwrap();
        if !state.is_open {
            return Err(P1Error::Read("mock: port is not open".into()));
        }
        state.stats.reads += 1;

        let scripted = state.script.pop_front();
        let event = match scripted {
            Some(event) => event,
            None if !state.cycle.is_empty() => {
                let pos = state.cycle_pos;
                state.cycle_pos = (pos + 1) % state.cycle.len();
                state.cycle[pos].clone()
            }
            None => MockEvent::Timeout,
        };

        match event {
            MockEvent::Line(line) => {
                state.stats.lines_served += 1;
                Ok(line)
            }
            MockEvent::Timeout => Err(P1Error::ReadTimeout(timeout)),
            MockEvent::Error(message) => Err(P1Error::Read(message)),
            MockEvent::Shutdown(line) => {
                if let Some(signal) = &state.shutdown {
                    signal.trigger();
                }
                match line {
                    Some(line) => {
                        state.stats.lines_served += 1;
                        Ok(line)
                    }
                    None => Err(P1Error::ReadTimeout(timeout)),
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), P1Error> {
        let mut state = self.state.lock().unwrap();
        if state.is_open {
            state.is_open = false;
            state.stats.closes += 1;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(20);

    #[tokio::test]
    async fn test_scripted_lines_are_served_in_order() {
        let mut mock = MockLineSource::new();
        mock.push_lines(["/ISK5ME382-1000", "1-0:1.8.1(00123.456*kWh)", "!"]);
        mock.open().await.unwrap();

        assert_eq!(mock.read_line(T).await.unwrap(), "/ISK5ME382-1000");
        assert_eq!(mock.read_line(T).await.unwrap(), "1-0:1.8.1(00123.456*kWh)");
        assert_eq!(mock.read_line(T).await.unwrap(), "!");
        assert!(matches!(mock.read_line(T).await, Err(P1Error::ReadTimeout(_))));
        assert_eq!(mock.stats().lines_served, 3);
        assert_eq!(mock.stats().reads, 4);
    }

    #[tokio::test]
    async fn test_read_requires_open_port() {
        let mut mock = MockLineSource::new();
        mock.push_line("!");
        assert!(matches!(mock.read_line(T).await, Err(P1Error::Read(_))));
        assert_eq!(mock.remaining(), 1);
    }

    #[tokio::test]
    async fn test_open_failures_are_counted() {
        let mut mock = MockLineSource::new();
        mock.fail_next_opens(2);
        assert!(mock.open().await.is_err());
        assert!(mock.open().await.is_err());
        assert!(mock.open().await.is_ok());
        mock.close().await.unwrap();
        mock.close().await.unwrap();

        let stats = mock.stats();
        assert_eq!(stats.failed_opens, 2);
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.closes, 1);
    }

    #[tokio::test]
    async fn test_cycle_replays_after_script() {
        let mut mock = MockLineSource::new();
        mock.push_line("first");
        mock.set_cycle(vec![MockEvent::Line("a".into()), MockEvent::Timeout]);
        mock.open().await.unwrap();

        assert_eq!(mock.read_line(T).await.unwrap(), "first");
        assert_eq!(mock.read_line(T).await.unwrap(), "a");
        assert!(mock.read_line(T).await.is_err());
        assert_eq!(mock.read_line(T).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_shutdown_event_triggers_signal() {
        let signal = ShutdownSignal::new();
        let mut mock = MockLineSource::new();
        mock.attach_shutdown(signal.clone());
        mock.push_shutdown(Some("!".into()));
        mock.open().await.unwrap();

        assert_eq!(mock.read_line(T).await.unwrap(), "!");
        assert!(signal.is_triggered());
    }
}
