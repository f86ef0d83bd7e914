//! CLI argument definitions

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::Parser;

use crate::monitor::MonitorConfig;
use crate::retention::DEFAULT_CAPACITY;

/// Largest accepted `--retention`.
pub const MAX_RETENTION: u64 = 1 << 20;

#[derive(Parser, Debug)]
#[command(
    name = "qitop",
    version,
    about = "Live call ranking and tracing of remote object services",
    after_help = "\
EXAMPLES:
    qitop --demo                                  Rank methods of the simulated services
    qitop --demo --service Camera --method getImage
                                                  Also trace one method
    qitop --demo --duration 30 --export run.json  Record 30s of calls to a file"
)]
pub struct Args {
    /// Service of the method to trace at startup
    #[arg(long, requires = "method")]
    pub service: Option<String>,

    /// Method to trace at startup
    #[arg(long, requires = "service")]
    pub method: Option<String>,

    /// Statistics poll interval in milliseconds
    #[arg(
        long,
        default_value = "1000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval_ms: u64,

    /// Upper bound on any single bus call, in milliseconds
    #[arg(
        long,
        default_value = "5000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_ms: u64,

    /// Samples kept per plotted series
    #[arg(
        long,
        default_value_t = DEFAULT_CAPACITY,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_RETENTION)
    )]
    pub retention: usize,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Export the final ranking and traced calls to a JSON file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Rows printed per poll cycle (0 = all)
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Run against simulated in-memory services
    #[arg(long)]
    pub demo: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Engine configuration derived from the flags.
    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.interval_ms),
            call_timeout: Duration::from_millis(self.timeout_ms),
            retention_capacity: self.retention,
            ..MonitorConfig::default()
        }
    }

    /// `(service, method)` to trace at startup, if both were given.
    #[must_use]
    pub fn initial_selection(&self) -> Option<(&str, &str)> {
        self.service.as_deref().zip(self.method.as_deref())
    }

    /// Duration limit, `None` when unlimited.
    #[must_use]
    pub fn duration_limit(&self) -> Option<Duration> {
        (self.duration > 0).then(|| Duration::from_secs(self.duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_monitor_config() {
        let args = Args::parse_from(["qitop", "--demo"]);
        assert_eq!(args.monitor_config(), MonitorConfig::default());
        assert_eq!(args.initial_selection(), None);
        assert_eq!(args.duration_limit(), None);
    }

    #[test]
    fn test_selection_flags_go_together() {
        assert!(Args::try_parse_from(["qitop", "--service", "Camera"]).is_err());
        assert!(Args::try_parse_from(["qitop", "--method", "getImage"]).is_err());

        let args =
            Args::try_parse_from(["qitop", "--service", "Camera", "--method", "getImage"]).unwrap();
        assert_eq!(args.initial_selection(), Some(("Camera", "getImage")));
    }

    #[test]
    fn test_tunables() {
        let args = Args::parse_from([
            "qitop",
            "--interval-ms",
            "250",
            "--timeout-ms",
            "100",
            "--retention",
            "64",
            "--duration",
            "3",
        ]);
        let config = args.monitor_config();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.call_timeout, Duration::from_millis(100));
        assert_eq!(config.retention_capacity, 64);
        assert_eq!(args.duration_limit(), Some(Duration::from_secs(3)));
        assert!(Args::try_parse_from(["qitop", "--interval-ms", "0"]).is_err());
    }

    #[test]
    fn test_retention_is_bounded() {
        assert!(Args::try_parse_from(["qitop", "--retention", "0"]).is_err());
        let huge = (usize::MAX / 2).to_string();
        assert!(Args::try_parse_from(["qitop", "--retention", huge.as_str()]).is_err());

        let max = MAX_RETENTION.to_string();
        let args = Args::parse_from(["qitop", "--retention", max.as_str()]);
        assert_eq!(args.monitor_config().retention_capacity, 1 << 20);
    }
}
