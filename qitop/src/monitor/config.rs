//! Monitor configuration
//!
//! One explicit value passed into every component constructor. The CLI
//! builds it from its flags (see [`crate::cli::Args::monitor_config`]).

use std::time::Duration;

use crate::retention::DEFAULT_CAPACITY;

/// Tunables of a monitoring session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Delay between two statistics polls
    pub poll_interval: Duration,

    /// Upper bound on any single bus call
    pub call_timeout: Duration,

    /// Samples kept per plotted series
    pub retention_capacity: usize,

    /// Call records buffered for the display/export side before dropping
    pub record_channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            call_timeout: Duration::from_secs(5),
            retention_capacity: DEFAULT_CAPACITY,
            record_channel_capacity: 1000,
        }
    }
}
