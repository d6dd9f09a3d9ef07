//! Running aggregates over accepted readings: the persisted state, the
//! recent-history ring buffer, and the rollover engine.

pub mod engine;
pub mod history;
pub mod state;

pub use engine::{Aggregator, SnapshotTrigger};
pub use history::RecentHistory;
pub use state::{AggregateState, HourlySlots};
