//! # Aggregation Engine
//!
//! Folds each [`Reading`] into the [`AggregateState`] and reports which
//! rollover snapshots the reading caused.
//!
//! Rollover is driven by the reading's wall-clock time against the state's
//! cursor (`currentDay`, `currentHour`). A day can only turn over together
//! with an hour, because readings are polled rather than clocked: if the
//! collector was offline across a whole day, that day is skipped.

use crate::aggregate::state::{AggregateState, HourlySlots};
use crate::constants::DAY_END_SLOT;
use crate::p1::telegram::Reading;
use chrono::{Datelike, NaiveDate, Timelike};
use log::{debug, info};

/// A snapshot the engine asks to be persisted in addition to the
/// per-reading "current" snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotTrigger {
    /// State at the end of an hour, keyed by the outgoing day and hour + 1.
    Hourly {
        day: u32,
        hour: u32,
        state: Box<AggregateState>,
    },
    /// State at the end of a day; persisted without the recent history.
    Daily {
        date: NaiveDate,
        state: Box<AggregateState>,
    },
}

/// Owner of the aggregate state for one run.
#[derive(Debug, Clone)]
pub struct Aggregator {
    state: AggregateState,
    gas_present: bool,
}

impl Aggregator {
    /// Wrap a loaded (or fresh) state for a run whose gas presence has been
    /// decided by alignment.
    pub fn new(mut state: AggregateState, gas_present: bool) -> Self {
        if gas_present {
            if state.gas_hourly_total.is_none() {
                debug!("Creating gas hourly total list");
                state.gas_hourly_total = Some(HourlySlots::default());
            }
        } else if state.gas_total.is_some() || state.gas_hourly_total.is_some() {
            info!("Meter reports no gas; dropping gas fields from restored snapshot");
            state.gas_total = None;
            state.gas_hourly_total = None;
        }
        Aggregator { state, gas_present }
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    pub fn into_state(self) -> AggregateState {
        self.state
    }

    pub fn gas_present(&self) -> bool {
        self.gas_present
    }

    /// Fold one reading into the state.
    pub fn fold(&mut self, reading: &Reading) -> Vec<SnapshotTrigger> {
        let mut triggers = Vec::new();
        let energy_now = reading.energy_now;
        let energy_total = reading.energy_total();
        let day = reading.timestamp.weekday().number_from_monday();
        let hour = reading.timestamp.hour();
        let previous_timestamp = self.state.timestamp;
        let state = &mut self.state;

        state.energy_now = Some(energy_now);
        state.total = energy_total;
        state.total_off_peak = reading.energy_total_off_peak;
        state.total_peak = reading.energy_total_peak;
        match (self.gas_present, reading.gas_total) {
            (true, Some(gas)) => state.gas_total = Some(gas),
            (false, Some(_)) => debug!("Ignoring gas value in a run without gas"),
            _ => {}
        }
        state.recent_history.push(energy_now);

        if hour == state.current_hour {
            let slot = hour as usize;
            state.hourly_min[slot] = Some(state.hourly_min[slot].map_or(energy_now, |m| m.min(energy_now)));
            state.hourly_max[slot] = Some(state.hourly_max[slot].map_or(energy_now, |m| m.max(energy_now)));
        } else {
            let day_changed = day != state.current_day;

            if day_changed {
                state.hourly_total[DAY_END_SLOT] = Some(state.total);
                if let Some(gas_hourly) = state.gas_hourly_total.as_mut() {
                    gas_hourly[DAY_END_SLOT] = state.gas_total;
                }
            }

            triggers.push(SnapshotTrigger::Hourly {
                day: state.current_day,
                hour: state.current_hour + 1,
                state: Box::new(state.clone()),
            });

            if state.current_hour == 23 {
                let date = previous_timestamp
                    .map(|ts| ts.date())
                    .unwrap_or_else(|| {
                        let today = reading.timestamp.date();
                        today.pred_opt().unwrap_or(today)
                    });
                triggers.push(SnapshotTrigger::Daily {
                    date,
                    state: Box::new(state.clone()),
                });
            }

            if day_changed {
                info!("Day rollover: weekday {} -> {}", state.current_day, day);
                state.hourly_min.clear();
                state.hourly_max.clear();
                state.hourly_total.clear();
                if let Some(gas_hourly) = state.gas_hourly_total.as_mut() {
                    gas_hourly.clear();
                }
                state.day_min = Some(energy_now);
                state.day_max = Some(energy_now);
                state.current_day = day;
            }

            debug!("Hour rollover: {} -> {}", state.current_hour, hour);
            state.current_hour = hour;
            let slot = hour as usize;
            state.hourly_min[slot] = Some(energy_now);
            state.hourly_max[slot] = Some(energy_now);
            state.hourly_total[slot] = Some(energy_total);
            let gas_total = state.gas_total;
            if let Some(gas_hourly) = state.gas_hourly_total.as_mut() {
                gas_hourly[slot] = gas_total;
            }
        }

        state.day_min = Some(state.day_min.map_or(energy_now, |m| m.min(energy_now)));
        state.day_max = Some(state.day_max.map_or(energy_now, |m| m.max(energy_now)));
        state.timestamp = Some(reading.timestamp);

        triggers
    }
}
