//! # Aggregate State
//!
//! The persisted process state. JSON keys keep the names used by the
//! collector's historical snapshot files (`eNow`, `eHourlyMinList`, ...) so
//! existing data directories and web front-ends keep working.

use crate::aggregate::history::RecentHistory;
use crate::constants::{HOURLY_TOTAL_SLOTS, HOURS_PER_DAY, TIMESTAMP_FORMAT};
use crate::error::P1Error;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

/// Key of the recent history list, dropped from daily snapshots.
pub const HISTORY_KEY: &str = "eLastHourList";

/// Key of the gas total, written as `null` while a gas run has no value yet.
pub const GAS_TOTAL_KEY: &str = "gasTotal";

pub(crate) fn serialize_timestamp<S: Serializer>(
    ts: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

mod optional_timestamp {
    use super::{serialize_timestamp, TIMESTAMP_FORMAT};
    use chrono::NaiveDateTime;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serialize_timestamp(ts, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid timestamp {raw:?}: {e}"))),
            None => Ok(None),
        }
    }
}

/// Per-hour slots; `None` means the hour has not been populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlySlots<const N: usize>([Option<i64>; N]);

impl<const N: usize> Default for HourlySlots<N> {
    fn default() -> Self {
        HourlySlots([None; N])
    }
}

impl<const N: usize> HourlySlots<N> {
    pub fn get(&self, slot: usize) -> Option<i64> {
        self.0.get(slot).copied().flatten()
    }

    pub fn clear(&mut self) {
        self.0 = [None; N];
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<i64>> + '_ {
        self.0.iter().copied()
    }

    pub fn populated(&self) -> usize {
        self.0.iter().filter(|s| s.is_some()).count()
    }
}

impl<const N: usize> Index<usize> for HourlySlots<N> {
    type Output = Option<i64>;

    fn index(&self, slot: usize) -> &Self::Output {
        &self.0[slot]
    }
}

impl<const N: usize> IndexMut<usize> for HourlySlots<N> {
    fn index_mut(&mut self, slot: usize) -> &mut Self::Output {
        &mut self.0[slot]
    }
}

impl<const N: usize> Serialize for HourlySlots<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de, const N: usize> Deserialize<'de> for HourlySlots<N> {
    /// Accepts lists of any length; extra slots are dropped and missing
    /// slots stay unset.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<Option<i64>>::deserialize(deserializer)?;
        let mut slots = HourlySlots::<N>::default();
        for (slot, value) in slots.0.iter_mut().zip(values) {
            *slot = value;
        }
        Ok(slots)
    }
}

/// The collector's running aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateState {
    #[serde(default, with = "optional_timestamp")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(rename = "eNow", default)]
    pub energy_now: Option<i64>,
    #[serde(rename = "eDayMin", default)]
    pub day_min: Option<i64>,
    #[serde(rename = "eDayMax", default)]
    pub day_max: Option<i64>,
    #[serde(rename = "eTotal", default)]
    pub total: i64,
    #[serde(rename = "eTotalOffPeak", default)]
    pub total_off_peak: i64,
    #[serde(rename = "eTotalPeak", default)]
    pub total_peak: i64,
    #[serde(rename = "gasTotal", default, skip_serializing_if = "Option::is_none")]
    pub gas_total: Option<i64>,
    #[serde(rename = "eHourlyMinList", default)]
    pub hourly_min: HourlySlots<HOURS_PER_DAY>,
    #[serde(rename = "eHourlyMaxList", default)]
    pub hourly_max: HourlySlots<HOURS_PER_DAY>,
    #[serde(rename = "eHourlyTotalList", default)]
    pub hourly_total: HourlySlots<HOURLY_TOTAL_SLOTS>,
    #[serde(
        rename = "gasHourlyTotalList",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub gas_hourly_total: Option<HourlySlots<HOURLY_TOTAL_SLOTS>>,
    #[serde(rename = "eLastHourList", default)]
    pub recent_history: RecentHistory,
    /// ISO weekday (1 = Monday) of the rollover cursor.
    #[serde(rename = "currentDay", default)]
    pub current_day: u32,
    /// Hour of day of the rollover cursor.
    #[serde(rename = "currentHour", default)]
    pub current_hour: u32,
}

impl AggregateState {
    /// Empty state with the rollover cursor at `now`.
    pub fn new(now: NaiveDateTime) -> Self {
        AggregateState {
            timestamp: None,
            energy_now: None,
            day_min: None,
            day_max: None,
            total: 0,
            total_off_peak: 0,
            total_peak: 0,
            gas_total: None,
            hourly_min: HourlySlots::default(),
            hourly_max: HourlySlots::default(),
            hourly_total: HourlySlots::default(),
            gas_hourly_total: None,
            recent_history: RecentHistory::new(),
            current_day: now.weekday().number_from_monday(),
            current_hour: now.hour(),
        }
    }

    /// Parse a persisted snapshot.
    ///
    /// Snapshots without a valid cursor (written before the cursor was
    /// persisted) take it from their timestamp, or from `now`.
    pub fn from_json(json: &str, now: NaiveDateTime) -> Result<Self, P1Error> {
        let mut state: AggregateState = serde_json::from_str(json)?;
        state.restore_cursor(now);
        Ok(state)
    }

    fn restore_cursor(&mut self, now: NaiveDateTime) {
        let valid_day = (1..=7).contains(&self.current_day);
        let valid_hour = (self.current_hour as usize) < HOURS_PER_DAY;
        if valid_day && valid_hour {
            return;
        }
        let anchor = self.timestamp.unwrap_or(now);
        self.current_day = anchor.weekday().number_from_monday();
        self.current_hour = anchor.hour();
    }

    pub fn has_gas(&self) -> bool {
        self.gas_hourly_total.is_some()
    }

    /// Key-sorted JSON document for persistence.
    pub fn to_document(&self, include_history: bool) -> Result<BTreeMap<String, Value>, P1Error> {
        let mut document: BTreeMap<String, Value> =
            serde_json::from_value(serde_json::to_value(self)?)?;
        if !include_history {
            document.remove(HISTORY_KEY);
        }
        if self.has_gas() {
            document.entry(GAS_TOTAL_KEY.to_string()).or_insert(Value::Null);
        }
        Ok(document)
    }
}
