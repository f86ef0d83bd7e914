//! # Monitoring Session Orchestration
//!
//! [`Monitor`] wires the engine together and owns every long-lived task:
//!
//! ```text
//!                      ┌──────────────────────────┐
//!  directory changes ─►│ registry watcher task    │──► ServiceRegistry
//!                      └──────────────────────────┘          │
//!                      ┌──────────────────────────┐          │ Added
//!                      │ statistics enabler task  │◄─────────┤
//!                      └──────────────────────────┘          │ list()
//!                      ┌──────────────────────────┐          ▼
//!  every poll_interval │ poll task (UsageRanker)  │──► ranking snapshot
//!                      └──────────────────────────┘
//!                      ┌──────────────────────────┐
//!  select_method() ───►│ correlator task (0 or 1) │──► series + CallRecord channel
//!                      └──────────────────────────┘
//! ```
//!
//! All tasks observe the session token. A session-fatal error from any of
//! them cancels the session; [`Monitor::shutdown`] reports it.

pub mod config;
pub mod session;

pub use config::MonitorConfig;
pub use session::Session;

use std::sync::{Arc, PoisonError, RwLock};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use qitop_common::ServiceChange;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::analysis::{to_rows, RankingEntry, RankingRow, UsageRanker};
use crate::bus::{with_timeout, Bus};
use crate::correlation::{
    CallRecord, CorrelatorHandle, CorrelatorOptions, CorrelatorState, CorrelatorStats,
    CorrelatorView, SeriesKind, SharedSeries,
};
use crate::domain::{BusError, MethodId, MonitorError};
use crate::registry::ServiceRegistry;

/// The method currently traced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub service: String,
    pub method: String,
    pub slot: MethodId,

    /// Location of the process hosting the service (`machine:pid`)
    pub location: String,
}

struct ActiveSelection {
    selection: Selection,
    handle: CorrelatorHandle,
}

/// Live monitoring engine over a bus.
pub struct Monitor {
    bus: Arc<dyn Bus>,
    config: MonitorConfig,
    session: Session,
    registry: ServiceRegistry,
    ranking: Arc<RwLock<Vec<RankingEntry>>>,
    active: tokio::sync::Mutex<Option<ActiveSelection>>,
    view: RwLock<Option<(Selection, CorrelatorView)>>,
    record_tx: Sender<CallRecord>,
    record_rx: Receiver<CallRecord>,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Connect to the directory, enable statistics everywhere and start the
    /// watcher and poll tasks.
    ///
    /// # Errors
    /// Fails if the directory cannot be reached or its change stream cannot
    /// be opened.
    pub async fn start(bus: Arc<dyn Bus>, config: MonitorConfig) -> Result<Self, MonitorError> {
        let session = Session::new();
        let (registry, changes) =
            ServiceRegistry::connect(bus.as_ref(), config.call_timeout).await?;
        let additions = registry.subscribe();

        for name in registry.list().keys() {
            reset_statistics(bus.as_ref(), name, &config).await;
        }

        let mut tasks = Vec::with_capacity(3);

        tasks.push(tokio::spawn({
            let registry = registry.clone();
            let bus = Arc::clone(&bus);
            let session = session.clone();
            let timeout = config.call_timeout;
            async move {
                let result = registry.watch(bus, changes, timeout, session.child_token()).await;
                if let Err(err) = result {
                    session.fail(err);
                }
            }
        }));

        tasks.push(tokio::spawn(enable_added_services(
            Arc::clone(&bus),
            additions,
            config.clone(),
            session.child_token(),
        )));

        let ranking = Arc::new(RwLock::new(Vec::new()));
        let ranker = UsageRanker::new(registry.clone(), Arc::clone(&bus), config.call_timeout);
        tasks.push(tokio::spawn(poll_loop(
            ranker,
            Arc::clone(&ranking),
            config.clone(),
            session.child_token(),
        )));

        let (record_tx, record_rx) = bounded(config.record_channel_capacity);
        info!("monitoring {} services", registry.len());

        Ok(Self {
            bus,
            config,
            session,
            registry,
            ranking,
            active: tokio::sync::Mutex::new(None),
            view: RwLock::new(None),
            record_tx,
            record_rx,
            tasks,
        })
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Start tracing `service.method`, stopping the previous correlator first.
    ///
    /// Validation happens before anything is stopped: on a user-input error
    /// the previous selection keeps running untouched.
    ///
    /// # Errors
    /// - [`MonitorError::ServiceNotFound`], [`MonitorError::MethodNotFound`],
    ///   [`MonitorError::IgnoredMethod`] for an invalid selection
    /// - [`MonitorError::SubscriptionFailed`] if tracing cannot be set up;
    ///   this also fails the session
    pub async fn select_method(
        &self,
        service: &str,
        method: &str,
    ) -> Result<Selection, MonitorError> {
        let mut active = self.active.lock().await;

        let descriptor = self.registry.resolve(service)?;
        let id = with_timeout(
            self.config.call_timeout,
            "resolve method",
            service,
            self.bus.resolve_method_id(service, method),
        )
        .await
        .map_err(|err| match err {
            MonitorError::Bus(BusError::MethodNotFound { service, method }) => {
                MonitorError::MethodNotFound { service, method }
            }
            MonitorError::Bus(BusError::ServiceNotFound(service)) => {
                MonitorError::ServiceNotFound(service)
            }
            other => other,
        })?;
        let slot = MethodId(id);
        if slot.is_ignored() {
            return Err(MonitorError::IgnoredMethod {
                service: service.to_string(),
                method: method.to_string(),
            });
        }

        if let Some(previous) = active.take() {
            self.stop_active(previous).await;
        }

        let options = CorrelatorOptions {
            service: service.to_string(),
            slot,
            series: SharedSeries::new(self.config.retention_capacity),
            record_tx: Some(self.record_tx.clone()),
            call_timeout: self.config.call_timeout,
        };
        let token = self.session.child_token();
        let handle = match CorrelatorHandle::start(Arc::clone(&self.bus), options, token).await {
            Ok(handle) => handle,
            Err(err) => {
                if err.is_fatal() {
                    self.session.fail(err.clone());
                }
                return Err(err);
            }
        };

        let selection = Selection {
            service: service.to_string(),
            method: method.to_string(),
            slot,
            location: descriptor.location,
        };
        *self.view.write().unwrap_or_else(PoisonError::into_inner) =
            Some((selection.clone(), handle.view().clone()));
        *active = Some(ActiveSelection {
            selection: selection.clone(),
            handle,
        });
        Ok(selection)
    }

    /// Stop tracing, if a method is selected.
    pub async fn clear_selection(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            self.stop_active(previous).await;
        }
    }

    async fn stop_active(&self, active: ActiveSelection) {
        let ActiveSelection { selection, handle } = active;
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = None;
        handle.stop().await;
        debug!("stopped tracing {}.{}", selection.service, selection.method);
    }

    #[must_use]
    pub fn selection(&self) -> Option<Selection> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(selection, _)| selection.clone())
    }

    // ========================================================================
    // Display side
    // ========================================================================

    /// Latest ranking as display rows, most called first.
    #[must_use]
    pub fn ranking_snapshot(&self) -> Vec<RankingRow> {
        to_rows(&self.ranking.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Up to `limit` most recent samples of one series of the selection;
    /// empty when nothing is selected.
    #[must_use]
    pub fn series(&self, kind: SeriesKind, limit: usize) -> Vec<f64> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, view)| view.series().snapshot(kind, limit))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn latency_series(&self, limit: usize) -> Vec<f64> {
        self.series(SeriesKind::Latency, limit)
    }

    #[must_use]
    pub fn error_latency_series(&self, limit: usize) -> Vec<f64> {
        self.series(SeriesKind::ErrorLatency, limit)
    }

    #[must_use]
    pub fn call_size_series(&self, limit: usize) -> Vec<f64> {
        self.series(SeriesKind::CallSize, limit)
    }

    #[must_use]
    pub fn reply_size_series(&self, limit: usize) -> Vec<f64> {
        self.series(SeriesKind::ReplySize, limit)
    }

    #[must_use]
    pub fn user_cpu_series(&self, limit: usize) -> Vec<f64> {
        self.series(SeriesKind::UserCpu, limit)
    }

    #[must_use]
    pub fn system_cpu_series(&self, limit: usize) -> Vec<f64> {
        self.series(SeriesKind::SystemCpu, limit)
    }

    #[must_use]
    pub fn correlator_stats(&self) -> Option<CorrelatorStats> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, view)| view.stats())
    }

    #[must_use]
    pub fn correlator_state(&self) -> Option<CorrelatorState> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, view)| view.state())
    }

    /// Receiving end of the call record channel.
    #[must_use]
    pub fn records(&self) -> Receiver<CallRecord> {
        self.record_rx.clone()
    }

    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Cancel the session, stop every task and disable statistics on the
    /// remaining services.
    ///
    /// # Errors
    /// Returns the session-fatal error that ended the session, if any.
    pub async fn shutdown(self) -> Result<(), MonitorError> {
        self.session.cancel();

        if let Some(active) = self.active.lock().await.take() {
            self.stop_active(active).await;
        }
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!("monitor task failed: {err}");
            }
        }

        for name in self.registry.list().keys() {
            if let Err(err) = with_timeout(
                self.config.call_timeout,
                "disable statistics",
                name,
                self.bus.enable_statistics(name, false),
            )
            .await
            {
                warn!("failed to disable statistics on {name}: {err}");
            }
        }

        match self.session.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Enable then clear statistics on one service; failures are logged.
async fn reset_statistics(bus: &dyn Bus, service: &str, config: &MonitorConfig) {
    if let Err(err) = try_reset_statistics(bus, service, config).await {
        warn!("statistics unavailable on {service}: {err}");
    }
}

async fn try_reset_statistics(
    bus: &dyn Bus,
    service: &str,
    config: &MonitorConfig,
) -> Result<(), MonitorError> {
    let timeout = config.call_timeout;
    let enable = bus.enable_statistics(service, true);
    with_timeout(timeout, "enable statistics", service, enable).await?;
    let clear = bus.clear_statistics(service);
    with_timeout(timeout, "clear statistics", service, clear).await
}

async fn enable_added_services(
    bus: Arc<dyn Bus>,
    mut changes: UnboundedReceiver<ServiceChange>,
    config: MonitorConfig,
    token: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            biased;
            () = token.cancelled() => break,
            change = changes.recv() => change,
        };
        match change {
            Some(ServiceChange::Added(name)) => {
                reset_statistics(bus.as_ref(), &name, &config).await;
            }
            Some(ServiceChange::Removed(_)) => {}
            None => break,
        }
    }
}

async fn poll_loop(
    mut ranker: UsageRanker,
    ranking: Arc<RwLock<Vec<RankingEntry>>>,
    config: MonitorConfig,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let entries = tokio::select! {
            biased;
            () = token.cancelled() => break,
            entries = ranker.poll() => entries,
        };
        *ranking.write().unwrap_or_else(PoisonError::into_inner) = entries;
    }
    debug!("poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusCall, MemoryBus};
    use qitop_common::{MethodStatistic, Timeval, TraceEvent};
    use std::time::Duration;

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(10),
            call_timeout: Duration::from_millis(200),
            retention_capacity: 32,
            record_channel_capacity: 16,
        }
    }

    fn bus() -> MemoryBus {
        let bus = MemoryBus::new();
        bus.add_service("Camera", "m1:100", &[(100, "getImage"), (101, "setResolution")]);
        bus.add_service("Motion", "m1:200", &[(100, "moveTo")]);
        bus
    }

    async fn wait_for_ranking(monitor: &Monitor) -> Vec<RankingRow> {
        loop {
            let rows = monitor.ranking_snapshot();
            if !rows.is_empty() {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_startup_enables_and_clears_statistics() {
        let bus = bus();
        let monitor = Monitor::start(Arc::new(bus.clone()), test_config()).await.unwrap();
        assert!(bus.is_collecting_statistics("Camera"));
        assert!(bus.is_collecting_statistics("Motion"));
        let cleared = BusCall::ClearStatistics {
            service: "Camera".into(),
        };
        assert!(bus.calls().contains(&cleared));

        monitor.shutdown().await.unwrap();
        assert!(!bus.is_collecting_statistics("Camera"));
        assert!(!bus.is_collecting_statistics("Motion"));
    }

    #[tokio::test]
    async fn test_poll_task_publishes_ranking() {
        let bus = bus();
        let monitor = Monitor::start(Arc::new(bus.clone()), test_config()).await.unwrap();
        bus.set_statistic("Camera", 100, MethodStatistic::new(3, 0.001, 0.003, 0.006));
        bus.set_statistic("Camera", 0x52, MethodStatistic::new(50, 0.001, 0.001, 0.05));

        let rows = wait_for_ranking(&monitor).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "Camera.getImage");
        assert_eq!(rows[0].rank, 1);
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_selection_keeps_previous() {
        let bus = bus();
        let monitor = Monitor::start(Arc::new(bus.clone()), test_config()).await.unwrap();
        let selected = monitor.select_method("Camera", "getImage").await.unwrap();
        assert_eq!(selected.location, "m1:100");
        assert_eq!(selected.slot, MethodId(100));

        assert_eq!(
            monitor.select_method("Ghost", "x").await,
            Err(MonitorError::ServiceNotFound("Ghost".into()))
        );
        assert!(matches!(
            monitor.select_method("Camera", "nope").await,
            Err(MonitorError::MethodNotFound { .. })
        ));
        assert!(matches!(
            monitor.select_method("Camera", "enableStats").await,
            Err(MonitorError::IgnoredMethod { .. })
        ));

        assert_eq!(monitor.selection(), Some(selected));
        assert_eq!(monitor.correlator_state(), Some(CorrelatorState::Active));
        assert!(bus.is_tracing("Camera"));
        assert!(!monitor.session().is_cancelled());
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_series_follow_selection() {
        let bus = bus();
        let monitor = Monitor::start(Arc::new(bus.clone()), test_config()).await.unwrap();
        assert!(monitor.latency_series(10).is_empty());

        monitor.select_method("Camera", "getImage").await.unwrap();
        bus.emit_trace("Camera", &TraceEvent::reply(1, 100, Timeval::new(1, 250), vec![1, 2]));
        bus.emit_trace("Camera", &TraceEvent::call(1, 100, Timeval::new(1, 0), vec![]));
        let records = monitor.records();
        let wait = move || records.recv_timeout(Duration::from_secs(1));
        let record = tokio::task::spawn_blocking(wait).await.unwrap().unwrap();
        assert_eq!(record.duration_us, 250);

        assert_eq!(monitor.latency_series(10), vec![250.0]);
        assert!(monitor.error_latency_series(10).is_empty());
        assert_eq!(monitor.reply_size_series(10).len(), 1);
        assert_eq!(monitor.correlator_stats().map(|s| s.paired), Some(1));

        monitor.clear_selection().await;
        assert_eq!(monitor.selection(), None);
        assert!(monitor.latency_series(10).is_empty());
        assert!(!bus.is_tracing("Camera"));
        monitor.shutdown().await.unwrap();
    }
}
