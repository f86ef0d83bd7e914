//! # Trace Correlation
//!
//! Pairs the call and response halves of every invocation of one method
//! (the *slot*) and feeds the resulting [`CallRecord`]s into the series.
//!
//! ## Lifecycle
//!
//! ```text
//!  Idle ──start()──► Active ──cancel / stream closed──► Stopped
//!         enable tracing        disable tracing, then unsubscribe
//!         subscribe
//! ```
//!
//! ## Event Routing
//!
//! - method id in the bus-internal range → discarded
//! - method id ≠ slot → discarded (other method of the same object)
//! - unknown kind tag → discarded
//! - first half of an id → kept in `pending`
//! - second half → paired, recorded, forwarded on the record channel
//!
//! The pending map and the counters belong to the consumer task; display
//! readers only see copies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info, warn};
use qitop_common::TraceEvent;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::call_record::{CallRecord, Outcome, PairingError};
use super::series::SharedSeries;
use crate::bus::{with_timeout, Bus, Subscription};
use crate::domain::{MethodId, MonitorError};

/// Diagnostic counters of one correlator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelatorStats {
    pub events: u64,
    pub discarded_other_slot: u64,
    pub discarded_ignored: u64,
    pub unknown_kind: u64,
    pub paired: u64,
    pub successes: u64,
    pub errors: u64,
    pub negative_durations: u64,
    /// Pairs whose timestamps do not fit in microseconds
    pub invalid_timestamps: u64,
    /// Pairs whose halves had the same role (two calls or two responses)
    pub mismatched: u64,
    /// Records not forwarded because the record channel was full
    pub dropped_records: u64,
    /// Halves currently waiting for their pair
    pub pending: usize,
}

// =============================================================================
// TRACE CORRELATOR (STATE MACHINE)
// =============================================================================

/// Pairing state for one slot.
pub struct TraceCorrelator {
    slot: MethodId,
    pending: HashMap<u32, TraceEvent>,
    series: SharedSeries,
    record_tx: Option<Sender<CallRecord>>,
    stats: CorrelatorStats,
}

impl TraceCorrelator {
    #[must_use]
    pub fn new(
        slot: MethodId,
        series: SharedSeries,
        record_tx: Option<Sender<CallRecord>>,
    ) -> Self {
        Self {
            slot,
            pending: HashMap::new(),
            series,
            record_tx,
            stats: CorrelatorStats::default(),
        }
    }

    #[must_use]
    pub fn slot(&self) -> MethodId {
        self.slot
    }

    #[must_use]
    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    /// Process one event; returns the record when it completes a pair.
    ///
    /// Never fails: anything that cannot be paired is counted and dropped.
    pub fn process_event(&mut self, event: TraceEvent) -> Option<CallRecord> {
        self.stats.events += 1;

        let method = MethodId(event.slot_id);
        if method.is_ignored() {
            self.stats.discarded_ignored += 1;
            return None;
        }
        if method != self.slot {
            self.stats.discarded_other_slot += 1;
            return None;
        }
        if event.kind().is_none() {
            self.stats.unknown_kind += 1;
            warn!("{}: unknown trace event kind {}", self.slot, event.kind);
            return None;
        }

        let Some(first) = self.pending.remove(&event.id) else {
            self.pending.insert(event.id, event);
            self.stats.pending = self.pending.len();
            return None;
        };
        self.stats.pending = self.pending.len();

        match CallRecord::from_pair(&first, &event) {
            Ok(record) => {
                self.accept(&record);
                Some(record)
            }
            Err(err @ PairingError::NegativeDuration { .. }) => {
                self.stats.negative_durations += 1;
                warn!("{}: discarding pair, {err}", self.slot);
                None
            }
            Err(err @ PairingError::TimestampOverflow(_)) => {
                self.stats.invalid_timestamps += 1;
                warn!("{}: discarding pair, {err}", self.slot);
                None
            }
            Err(err) => {
                self.stats.mismatched += 1;
                warn!("{}: discarding pair, {err}", self.slot);
                None
            }
        }
    }

    fn accept(&mut self, record: &CallRecord) {
        self.stats.paired += 1;
        match record.outcome {
            Outcome::Success => self.stats.successes += 1,
            Outcome::Error => self.stats.errors += 1,
        }
        self.series.record(record);

        if let Some(ref tx) = self.record_tx {
            match tx.try_send(record.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.stats.dropped_records += 1,
                Err(TrySendError::Disconnected(_)) => {
                    debug!("record consumer gone, no longer forwarding");
                    self.record_tx = None;
                }
            }
        }
    }
}

// =============================================================================
// CORRELATOR TASK
// =============================================================================

/// Lifecycle state of a correlator task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatorState {
    Idle,
    Active,
    Stopped,
}

impl CorrelatorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Active,
            _ => Self::Stopped,
        }
    }
}

/// What a correlator needs to run, besides the bus.
pub struct CorrelatorOptions {
    pub service: String,
    pub slot: MethodId,
    pub series: SharedSeries,
    pub record_tx: Option<Sender<CallRecord>>,
    pub call_timeout: Duration,
}

/// Read side of a running correlator, cheap to clone.
#[derive(Clone)]
pub struct CorrelatorView {
    series: SharedSeries,
    stats: Arc<Mutex<CorrelatorStats>>,
    state: Arc<AtomicU8>,
}

impl CorrelatorView {
    fn new(series: SharedSeries) -> Self {
        Self {
            series,
            stats: Arc::new(Mutex::new(CorrelatorStats::default())),
            state: Arc::new(AtomicU8::new(CorrelatorState::Idle as u8)),
        }
    }

    #[must_use]
    pub fn series(&self) -> &SharedSeries {
        &self.series
    }

    #[must_use]
    pub fn stats(&self) -> CorrelatorStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> CorrelatorState {
        CorrelatorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CorrelatorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn publish(&self, stats: CorrelatorStats) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = stats;
    }
}

/// Running correlator: stop it with [`CorrelatorHandle::stop`].
pub struct CorrelatorHandle {
    bus: Arc<dyn Bus>,
    service: String,
    slot: MethodId,
    call_timeout: Duration,
    token: CancellationToken,
    join: JoinHandle<()>,
    view: CorrelatorView,
}

impl CorrelatorHandle {
    /// Enable tracing on `service`, subscribe to its trace stream and spawn
    /// the consumer task under `token`.
    ///
    /// # Errors
    /// Returns [`MonitorError::SubscriptionFailed`] if tracing cannot be
    /// enabled or the stream cannot be opened; tracing is switched back off
    /// in the latter case.
    pub async fn start(
        bus: Arc<dyn Bus>,
        options: CorrelatorOptions,
        token: CancellationToken,
    ) -> Result<Self, MonitorError> {
        let CorrelatorOptions {
            service,
            slot,
            series,
            record_tx,
            call_timeout,
        } = options;
        let view = CorrelatorView::new(series.clone());
        let subscription_failed = |err: MonitorError| MonitorError::SubscriptionFailed {
            what: "trace events",
            service: service.clone(),
            reason: err.to_string(),
        };

        with_timeout(
            call_timeout,
            "enable tracing",
            &service,
            bus.enable_tracing(&service, true),
        )
        .await
        .map_err(subscription_failed)?;

        let events = match with_timeout(
            call_timeout,
            "subscribe trace events",
            &service,
            bus.subscribe_trace_events(&service),
        )
        .await
        {
            Ok(events) => events,
            Err(err) => {
                disable_tracing(bus.as_ref(), &service, call_timeout).await;
                return Err(subscription_failed(err));
            }
        };

        view.set_state(CorrelatorState::Active);
        info!("tracing {service} slot {slot}");

        let correlator = TraceCorrelator::new(slot, series, record_tx);
        let task = CorrelatorTask {
            bus: Arc::clone(&bus),
            service: service.clone(),
            call_timeout,
            token: token.clone(),
            view: view.clone(),
        };
        let join = tokio::spawn(task.run(correlator, events));

        Ok(Self {
            bus,
            service,
            slot,
            call_timeout,
            token,
            join,
            view,
        })
    }

    /// Cancel the task and wait until tracing has been disabled.
    ///
    /// If the task died before its own cleanup ran, tracing is disabled here.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.join.await {
            warn!("correlator task for {} slot {} failed: {err}", self.service, self.slot);
            disable_tracing(self.bus.as_ref(), &self.service, self.call_timeout).await;
            self.view.set_state(CorrelatorState::Stopped);
        }
    }

    #[must_use]
    pub fn view(&self) -> &CorrelatorView {
        &self.view
    }

    #[must_use]
    pub fn state(&self) -> CorrelatorState {
        self.view.state()
    }

    #[must_use]
    pub fn stats(&self) -> CorrelatorStats {
        self.view.stats()
    }
}

struct CorrelatorTask {
    bus: Arc<dyn Bus>,
    service: String,
    call_timeout: Duration,
    token: CancellationToken,
    view: CorrelatorView,
}

impl CorrelatorTask {
    async fn run(
        self,
        mut correlator: TraceCorrelator,
        mut events: Subscription<TraceEvent>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                event = events.next() => event,
            };
            let Some(event) = event else {
                info!("trace stream of {} closed", self.service);
                break;
            };
            correlator.process_event(event);
            self.view.publish(correlator.stats());
        }

        disable_tracing(self.bus.as_ref(), &self.service, self.call_timeout).await;
        events.cancel();
        self.view.set_state(CorrelatorState::Stopped);

        let stats = correlator.stats();
        debug!(
            "correlator {} {} stopped: {} paired, {} pending dropped",
            self.service,
            correlator.slot(),
            stats.paired,
            stats.pending
        );
    }
}

async fn disable_tracing(bus: &dyn Bus, service: &str, timeout: Duration) {
    let disable = bus.enable_tracing(service, false);
    if let Err(err) = with_timeout(timeout, "disable tracing", service, disable).await {
        warn!("failed to disable tracing on {service}: {err}");
    }
}
