//! The p1 module contains the components that deal with the meter's serial
//! stream: the line source abstraction, telegram alignment, and telegram
//! parsing.

pub mod alignment;
pub mod mock;
pub mod serial;
pub mod telegram;

pub use alignment::{align, Aligner, AlignmentConfig, AlignmentOutcome, AlignmentState};
pub use serial::{LineSource, SerialConfig, SerialLineSource};
pub use telegram::{parse_telegram, Reading, TelegramBuffer, TelegramProgress};
