//! # Utility Modules
//!
//! Small helpers shared by the collector loop.

pub mod logging;

pub use logging::{LogThrottle, ThrottleManager};
