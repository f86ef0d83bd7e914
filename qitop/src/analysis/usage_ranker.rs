//! Usage ranking of remote methods.
//!
//! Each poll cycle fetches the statistics of every registered service and
//! merges them into per-action counters, then ranks the actions that were
//! called at least once.
//!
//! ## Data Flow
//!
//! ```text
//! ServiceRegistry::list()   (snapshot, no lock held)
//!     │
//!     ├──► bus.statistics(A) ─┐
//!     ├──► bus.statistics(B) ─┼──► join_all ──► merge() ──► ranking()
//!     └──► bus.statistics(C) ─┘   (failed or timed out services are skipped)
//! ```
//!
//! The remote object owns cumulation: a successful poll **replaces** every
//! counter of that service, so actions it no longer reports (after a restart
//! or a clear) disappear. Counters of a skipped service keep their last known
//! value; counters of a service that left the registry are dropped.

// Latencies are converted from f64 seconds for display
#![allow(clippy::cast_precision_loss)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};
use qitop_common::MethodStatistic;
use serde::Serialize;

use crate::bus::{with_timeout, Bus, StatisticsMap};
use crate::domain::{Action, MethodId};
use crate::registry::{ServiceDescriptor, ServiceRegistry};

// =============================================================================
// RANKING ENTRY (OUTPUT TYPE)
// =============================================================================

/// Counters of one action as last reported by its service.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub action: Action,
    pub stat: MethodStatistic,
}

impl RankingEntry {
    /// Display row at position `rank` (1-based), latencies in microseconds.
    #[must_use]
    pub fn to_row(&self, rank: usize) -> RankingRow {
        RankingRow {
            rank,
            count: self.stat.count,
            min_latency_us: self.stat.min_wall * 1e6,
            max_latency_us: self.stat.max_wall * 1e6,
            avg_latency_us: self.stat.avg_wall() * 1e6,
            action: self.action.to_string(),
        }
    }
}

/// One line of the ranking table, as consumed by display and export.
///
/// ```text
///  count | min (us) | max (us) | avg (us) | Service.Method
///     42 |      120 |     9800 |      870 | Camera.getImage
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingRow {
    pub rank: usize,
    pub count: u32,
    pub min_latency_us: f64,
    pub max_latency_us: f64,
    pub avg_latency_us: f64,
    pub action: String,
}

/// Ranking order: most called first, then highest cumulative latency, then
/// action name so that the order is total.
#[must_use]
pub fn compare_entries(a: &RankingEntry, b: &RankingEntry) -> Ordering {
    b.stat
        .count
        .cmp(&a.stat.count)
        .then_with(|| b.stat.cumulative_wall.total_cmp(&a.stat.cumulative_wall))
        .then_with(|| a.action.cmp(&b.action))
}

/// Rows for an already sorted ranking, numbered from 1.
#[must_use]
pub fn to_rows(entries: &[RankingEntry]) -> Vec<RankingRow> {
    entries.iter().enumerate().map(|(i, entry)| entry.to_row(i + 1)).collect()
}

// =============================================================================
// USAGE RANKER (AGGREGATOR)
// =============================================================================

/// Polls statistics of every registered service and ranks their methods.
pub struct UsageRanker {
    registry: ServiceRegistry,
    bus: Arc<dyn Bus>,
    counters: HashMap<Action, MethodStatistic>,
    timeout: Duration,
}

impl UsageRanker {
    #[must_use]
    pub fn new(registry: ServiceRegistry, bus: Arc<dyn Bus>, timeout: Duration) -> Self {
        Self {
            registry,
            bus,
            counters: HashMap::new(),
            timeout,
        }
    }

    /// Run one poll cycle and return the resulting ranking.
    ///
    /// Never fails: a service whose statistics call errors or times out is
    /// logged and skipped for this cycle.
    pub async fn poll(&mut self) -> Vec<RankingEntry> {
        let services = self.registry.list();
        let timeout = self.timeout;
        let bus = &self.bus;

        let fetches = services.values().map(|descriptor| async move {
            let fetch = bus.statistics(&descriptor.name);
            let result = with_timeout(timeout, "statistics", &descriptor.name, fetch).await;
            (descriptor, result)
        });
        let results = join_all(fetches).await;

        self.counters.retain(|action, _| services.contains_key(action.service()));
        for (descriptor, result) in results {
            match result {
                Ok(stats) => self.merge(descriptor, &stats),
                Err(err) => warn!("skipping {} this cycle: {err}", descriptor.name),
            }
        }
        self.ranking()
    }

    /// Replace the counters of `descriptor` with the ones in `stats`.
    ///
    /// Actions of that service absent from `stats` are forgotten. Ids in the
    /// bus-internal range and ids missing from the method map are dropped.
    pub fn merge(&mut self, descriptor: &ServiceDescriptor, stats: &StatisticsMap) {
        self.counters.retain(|action, _| action.service() != descriptor.name);
        for (&id, stat) in stats {
            let method = MethodId(id);
            if method.is_ignored() {
                continue;
            }
            match descriptor.action(method) {
                Some(action) => {
                    self.counters.insert(action, *stat);
                }
                None => debug!("{}: no method for id {method}", descriptor.name),
            }
        }
    }

    /// Current ranking over the merged counters, entries with no call omitted.
    #[must_use]
    pub fn ranking(&self) -> Vec<RankingEntry> {
        let mut entries: Vec<RankingEntry> = self
            .counters
            .iter()
            .filter(|(_, stat)| stat.count > 0)
            .map(|(action, stat)| RankingEntry {
                action: action.clone(),
                stat: *stat,
            })
            .collect();
        entries.sort_unstable_by(compare_entries);
        entries
    }

    /// Number of actions with a stored counter.
    #[must_use]
    pub fn tracked_actions(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    fn descriptor(name: &str, methods: &[(u32, &str)]) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            location: format!("{name}:1"),
            methods: methods.iter().map(|&(id, m)| (id, m.to_string())).collect(),
        }
    }

    fn actions(entries: &[RankingEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.action.as_str()).collect()
    }

    fn ranker_over(bus: &MemoryBus, timeout: Duration) -> UsageRanker {
        const METHODS: &[(u32, &str)] = &[(100, "m1"), (101, "m2"), (0x51, "enableStats")];
        let registry = ServiceRegistry::new();
        for name in bus.service_names() {
            registry.insert(descriptor(&name, METHODS));
        }
        UsageRanker::new(registry, Arc::new(bus.clone()), timeout)
    }

    fn offline_ranker() -> UsageRanker {
        let bus = Arc::new(MemoryBus::new());
        UsageRanker::new(ServiceRegistry::new(), bus, Duration::from_secs(1))
    }

    fn single(id: u32, stat: MethodStatistic) -> StatisticsMap {
        [(id, stat)].into()
    }

    #[test]
    fn test_ranking_order_count_then_cumulative() {
        let mut ranker = offline_ranker();
        let a = MethodStatistic::new(5, 0.001, 0.003, 0.010);
        let b = MethodStatistic::new(5, 0.002, 0.006, 0.020);
        let c = MethodStatistic::new(2, 0.5, 0.5, 1.0);
        ranker.merge(&descriptor("A", &[(1, "m1")]), &single(1, a));
        ranker.merge(&descriptor("B", &[(2, "m2")]), &single(2, b));
        ranker.merge(&descriptor("C", &[(3, "m3")]), &single(3, c));

        assert_eq!(actions(&ranker.ranking()), vec!["B.m2", "A.m1", "C.m3"]);
    }

    #[test]
    fn test_full_tie_falls_back_to_action_name() {
        let stat = MethodStatistic::new(3, 0.1, 0.1, 0.3);
        let a = RankingEntry {
            action: Action::new("A", "x"),
            stat,
        };
        let b = RankingEntry {
            action: Action::new("B", "x"),
            stat,
        };
        assert_eq!(compare_entries(&a, &b), Ordering::Less);
        assert_eq!(compare_entries(&b, &a), Ordering::Greater);
        assert_eq!(compare_entries(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_merge_overwrites_and_filters() {
        let mut ranker = offline_ranker();
        let camera = descriptor(
            "Camera",
            &[(100, "getImage"), (101, "idle"), (0x51, "enableStats")],
        );

        ranker.merge(
            &camera,
            &[
                (100, MethodStatistic::new(4, 0.1, 0.4, 1.0)),
                (101, MethodStatistic::new(0, 0.0, 0.0, 0.0)),
                (0x51, MethodStatistic::new(99, 0.1, 0.1, 9.9)),
                (999, MethodStatistic::new(7, 0.1, 0.1, 0.7)),
            ]
            .into(),
        );
        assert_eq!(ranker.tracked_actions(), 2);
        ranker.merge(&camera, &single(100, MethodStatistic::new(1, 0.2, 0.2, 0.2)));

        let ranking = ranker.ranking();
        assert_eq!(actions(&ranking), vec!["Camera.getImage"]);
        assert_eq!(ranking[0].stat.count, 1, "poll replaces, never accumulates");
        assert_eq!(ranker.tracked_actions(), 1);
    }

    #[test]
    fn test_merge_only_replaces_its_own_service() {
        let mut ranker = offline_ranker();
        let stat = MethodStatistic::new(2, 0.1, 0.1, 0.2);
        ranker.merge(&descriptor("A", &[(1, "m1")]), &single(1, stat));
        ranker.merge(&descriptor("B", &[(1, "m1")]), &single(1, stat));

        ranker.merge(&descriptor("A", &[(1, "m1")]), &StatisticsMap::new());
        assert_eq!(actions(&ranker.ranking()), vec!["B.m1"]);
    }

    #[test]
    fn test_rows_convert_to_microseconds() {
        let entry = RankingEntry {
            action: Action::new("Camera", "getImage"),
            stat: MethodStatistic::new(4, 0.000_1, 0.000_4, 0.001),
        };
        let rows = to_rows(&[entry]);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].action, "Camera.getImage");
        assert!((rows[0].min_latency_us - 100.0).abs() < 1e-6);
        assert!((rows[0].max_latency_us - 400.0).abs() < 1e-6);
        assert!((rows[0].avg_latency_us - 250.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failing_service_is_skipped() {
        let bus = MemoryBus::new();
        for name in ["A", "B", "C"] {
            bus.add_service(name, "m:1", &[(100, "m1")]);
            bus.set_statistic(name, 100, MethodStatistic::new(3, 0.1, 0.1, 0.3));
        }
        bus.fail_statistics("B", true);

        let mut ranker = ranker_over(&bus, Duration::from_secs(1));
        assert_eq!(actions(&ranker.poll().await), vec!["A.m1", "C.m1"]);
    }

    #[tokio::test]
    async fn test_skipped_service_keeps_last_known_value() {
        let bus = MemoryBus::new();
        bus.add_service("A", "m:1", &[(100, "m1")]);
        bus.set_statistic("A", 100, MethodStatistic::new(3, 0.1, 0.1, 0.3));
        let mut ranker = ranker_over(&bus, Duration::from_millis(50));
        assert_eq!(ranker.poll().await.len(), 1);

        bus.stall_statistics("A", true);
        let ranking = ranker.poll().await;
        assert_eq!(actions(&ranking), vec!["A.m1"]);
        assert_eq!(ranking[0].stat.count, 3);
    }

    #[tokio::test]
    async fn test_cleared_statistics_leave_ranking() {
        let bus = MemoryBus::new();
        bus.add_service("A", "m:1", &[(100, "m1")]);
        bus.set_statistic("A", 100, MethodStatistic::new(3, 0.1, 0.1, 0.3));
        let mut ranker = ranker_over(&bus, Duration::from_secs(1));
        assert_eq!(actions(&ranker.poll().await), vec!["A.m1"]);

        bus.clear_statistics("A").await.unwrap();
        assert!(ranker.poll().await.is_empty());
        assert_eq!(ranker.tracked_actions(), 0);
    }

    #[tokio::test]
    async fn test_removed_service_leaves_ranking() {
        let bus = MemoryBus::new();
        bus.add_service("A", "m:1", &[(100, "m1")]);
        bus.add_service("B", "m:2", &[(100, "m1")]);
        bus.set_statistic("A", 100, MethodStatistic::new(3, 0.1, 0.1, 0.3));
        bus.set_statistic("B", 100, MethodStatistic::new(1, 0.1, 0.1, 0.1));

        let mut ranker = ranker_over(&bus, Duration::from_secs(1));
        assert_eq!(ranker.poll().await.len(), 2);

        ranker.registry.remove("A");
        assert_eq!(actions(&ranker.poll().await), vec!["B.m1"]);
    }
}
