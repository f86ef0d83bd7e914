//! Analysis of polled statistics
//!
//! Pure ranking logic lives here, separated from the polling cadence owned
//! by the monitor and from the text rendering in `report`.

pub mod usage_ranker;

pub use usage_ranker::{compare_entries, to_rows, RankingEntry, RankingRow, UsageRanker};
