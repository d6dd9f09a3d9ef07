//! Fixed-capacity history of recent `energyNow` samples.

use crate::constants::RECENT_HISTORY_LEN;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;

/// Ring buffer of the last [`RECENT_HISTORY_LEN`] samples, most recent last.
///
/// The buffer always holds exactly `RECENT_HISTORY_LEN` slots; slots that
/// have not been filled since creation are `None` (serialized as `null`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentHistory {
    samples: VecDeque<Option<i64>>,
}

impl Default for RecentHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentHistory {
    pub fn new() -> Self {
        RecentHistory {
            samples: std::iter::repeat(None).take(RECENT_HISTORY_LEN).collect(),
        }
    }

    /// Build from persisted samples, keeping the newest ones and padding the
    /// front with empty slots.
    pub fn from_samples(samples: Vec<Option<i64>>) -> Self {
        let skip = samples.len().saturating_sub(RECENT_HISTORY_LEN);
        let mut history: VecDeque<Option<i64>> = samples.into_iter().skip(skip).collect();
        while history.len() < RECENT_HISTORY_LEN {
            history.push_front(None);
        }
        RecentHistory { samples: history }
    }

    /// Append a sample, evicting the oldest.
    pub fn push(&mut self, value: i64) {
        self.samples.pop_front();
        self.samples.push_back(Some(value));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<i64> {
        self.samples.back().copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<i64>> + '_ {
        self.samples.iter().copied()
    }

    /// Filled samples in order, oldest first.
    pub fn values(&self) -> Vec<i64> {
        self.samples.iter().filter_map(|s| *s).collect()
    }
}

impl Serialize for RecentHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.samples.iter())
    }
}

impl<'de> Deserialize<'de> for RecentHistory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let samples = Vec::<Option<i64>>::deserialize(deserializer)?;
        Ok(RecentHistory::from_samples(samples))
    }
}
