//! Domain values shared by every layer: wall-clock timestamps and the
//! requested date range.

mod date_range;
mod timestamp;

pub use date_range::DateRange;
pub use timestamp::UtcDateTime;
