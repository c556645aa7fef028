//! Peak filtering

mod max_count;

pub use max_count::{filter_by_max_count, FilterOutcome};
