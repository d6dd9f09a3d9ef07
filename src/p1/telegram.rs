//! # P1 Telegram Parsing
//!
//! A telegram is the ordered batch of lines a meter emits between two `!`
//! sentinels. This module collects those lines and turns one telegram into a
//! typed [`Reading`].
//!
//! Registers are matched on a fixed-width prefix and their value is taken
//! from a fixed character window of the line:
//!
//! | Prefix       | Field                | Window                |
//! |--------------|----------------------|-----------------------|
//! | `1-0:1.8.1`  | `energyTotalOffPeak` | `10..19`              |
//! | `1-0:1.8.2`  | `energyTotalPeak`    | `10..19`              |
//! | `1-0:1.7.0`  | `energyNow`          | `10..17`              |
//! | `0-1:24.3.0` | `gasTotal`           | next line, `1..10`    |

use crate::constants::{
    MAX_TELEGRAM_LINES, MILLI_UNITS_PER_UNIT, P1_ENERGY_VALUE_WINDOW, P1_GAS_VALUE_WINDOW,
    P1_HEADER_MARKER, P1_POWER_VALUE_WINDOW, P1_REGISTER_ENERGY_OFF_PEAK, P1_REGISTER_ENERGY_PEAK,
    P1_REGISTER_GAS, P1_REGISTER_POWER_NOW, P1_TELEGRAM_SENTINEL,
};
use crate::error::P1Error;
use chrono::NaiveDateTime;
use log::{debug, warn};
use nom::{
    character::complete::{char, digit0, digit1, space0},
    combinator::{map_opt, opt},
    sequence::{pair, preceded},
    IResult,
};
use serde::Serialize;

/// Values extracted from one telegram, in milli-units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(serialize_with = "crate::aggregate::state::serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    pub energy_now: i64,
    pub energy_total_off_peak: i64,
    pub energy_total_peak: i64,
    /// `None` when the run has no gas meter, or when the gas register was
    /// missing from this telegram (no update this cycle).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_total: Option<i64>,
}

impl Reading {
    /// Sum of the off-peak and peak counters.
    pub fn energy_total(&self) -> i64 {
        self.energy_total_off_peak + self.energy_total_peak
    }
}

/// Parse a decimal register value into milli-units.
///
/// The integer part is scaled by 1000 and the fraction is truncated to three
/// digits, so `"00123.456"` becomes `123456` and `"0000.3219"` becomes `321`.
pub fn milli_units(input: &str) -> IResult<&str, i64> {
    preceded(
        space0,
        map_opt(
            pair(digit1, opt(preceded(char('.'), digit0))),
            |(whole, fraction): (&str, Option<&str>)| {
                let whole: i64 = whole.parse().ok()?;
                let mut milli = 0i64;
                let mut scale = MILLI_UNITS_PER_UNIT / 10;
                for digit in fraction.unwrap_or("").bytes().take(3) {
                    milli += i64::from(digit - b'0') * scale;
                    scale /= 10;
                }
                whole.checked_mul(MILLI_UNITS_PER_UNIT)?.checked_add(milli)
            },
        ),
    )(input)
}

/// Extract the value window `(start, end)` of `line`, clamped to its length.
fn value_window(line: &str, (start, end): (usize, usize)) -> Option<&str> {
    line.get(start..end.min(line.len()))
}

fn register_value(line: &str, window: (usize, usize), field: &'static str) -> Result<i64, P1Error> {
    let raw = value_window(line, window).unwrap_or("");
    match milli_units(raw) {
        // Only a unit suffix or closing bracket may follow the number
        Ok((rest, value)) if rest.is_empty() || rest.starts_with(['*', ')']) => Ok(value),
        _ => Err(P1Error::InvalidValue {
            field,
            raw: raw.to_string(),
        }),
    }
}

fn keep_valid(result: Result<i64, P1Error>) -> Option<i64> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{e}");
            None
        }
    }
}

/// Turn one telegram into a [`Reading`].
///
/// Every field starts unset for each call; a mandatory register missing from
/// `lines` (or holding a non-numeric value) yields
/// [`P1Error::ParseIncomplete`]. When `gas_present` is false the gas
/// register is ignored entirely.
pub fn parse_telegram<S: AsRef<str>>(
    lines: &[S],
    gas_present: bool,
    timestamp: NaiveDateTime,
) -> Result<Reading, P1Error> {
    let mut off_peak = None;
    let mut peak = None;
    let mut now = None;
    let mut gas = None;

    for (i, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if line.starts_with(P1_REGISTER_ENERGY_OFF_PEAK) {
            off_peak = keep_valid(register_value(
                line,
                P1_ENERGY_VALUE_WINDOW,
                "energyTotalOffPeak",
            ));
        } else if line.starts_with(P1_REGISTER_ENERGY_PEAK) {
            peak = keep_valid(register_value(line, P1_ENERGY_VALUE_WINDOW, "energyTotalPeak"));
        } else if line.starts_with(P1_REGISTER_POWER_NOW) {
            now = keep_valid(register_value(line, P1_POWER_VALUE_WINDOW, "energyNow"));
        } else if line.starts_with(P1_REGISTER_GAS) {
            // The gas value sits on the line after the register header
            if gas_present {
                gas = lines.get(i + 1).and_then(|next| {
                    keep_valid(register_value(next.as_ref(), P1_GAS_VALUE_WINDOW, "gasTotal"))
                });
            }
        } else if line.starts_with(P1_HEADER_MARKER) {
            debug!("Telegram from meter {}", &line[1..]);
        }
    }

    match (now, off_peak, peak) {
        (Some(energy_now), Some(energy_total_off_peak), Some(energy_total_peak)) => {
            if gas_present && gas.is_none() {
                debug!("Gas register absent from telegram, keeping previous gas total");
            }
            Ok(Reading {
                timestamp,
                energy_now,
                energy_total_off_peak,
                energy_total_peak,
                gas_total: gas,
            })
        }
        _ => {
            let missing = [
                ("energyNow", now),
                ("energyTotalOffPeak", off_peak),
                ("energyTotalPeak", peak),
            ]
            .into_iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name)
            .collect();
            Err(P1Error::ParseIncomplete { missing })
        }
    }
}

/// Result of feeding one line to a [`TelegramBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramProgress {
    /// The sentinel has not been seen yet.
    Incomplete,
    /// The sentinel closed a telegram; the lines include the sentinel.
    Complete(Vec<String>),
    /// Too many lines without a sentinel; the buffered lines were dropped.
    Overflow(usize),
}

/// Accumulates lines until the `!` sentinel closes a telegram.
#[derive(Debug, Default)]
pub struct TelegramBuffer {
    lines: Vec<String>,
}

impl TelegramBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: String) -> TelegramProgress {
        let is_sentinel = line == P1_TELEGRAM_SENTINEL;
        self.lines.push(line);
        if is_sentinel {
            return TelegramProgress::Complete(std::mem::take(&mut self.lines));
        }
        if self.lines.len() >= MAX_TELEGRAM_LINES {
            let dropped = self.lines.len();
            self.lines.clear();
            return TelegramProgress::Overflow(dropped);
        }
        TelegramProgress::Incomplete
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
