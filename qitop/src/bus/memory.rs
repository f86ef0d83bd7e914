//! In-process bus implementation
//!
//! Keeps services, their statistics and the subscribers in memory. Every
//! flag change and subscription made by the monitor is appended to a call
//! log so tests can assert on the exact enable/disable sequence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use qitop_common::{MethodStatistic, ServiceChange, ServiceInfo, TraceEvent};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use super::{Bus, MethodMap, StatisticsMap, Subscription, Unsubscribe};
use crate::domain::BusError;

/// Methods every object exposes for statistics, in the ignored id range.
const BUILTIN_METHODS: [(u32, &str); 4] = [
    (0x50, "isStatsEnabled"),
    (0x51, "enableStats"),
    (0x52, "stats"),
    (0x53, "clearStats"),
];

/// A flag change or subscription observed by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    EnableStatistics { service: String, enabled: bool },
    ClearStatistics { service: String },
    EnableTracing { service: String, enabled: bool },
    SubscribeTraces { service: String },
    UnsubscribeTraces { service: String },
}

#[derive(Debug)]
struct MemoryService {
    info: ServiceInfo,
    methods: MethodMap,
    stats: StatisticsMap,
    stats_enabled: bool,
    tracing_enabled: bool,
    fail_statistics: bool,
    stall_statistics: bool,
}

#[derive(Default)]
struct State {
    services: BTreeMap<String, MemoryService>,
    directory_watchers: HashMap<u64, UnboundedSender<ServiceChange>>,
    directory_closed: bool,
    trace_subscribers: HashMap<u64, (String, UnboundedSender<TraceEvent>)>,
    next_subscription: u64,
    calls: Vec<BusCall>,
}

impl State {
    fn service(&self, name: &str) -> Result<&MemoryService, BusError> {
        self.services
            .get(name)
            .ok_or_else(|| BusError::ServiceNotFound(name.to_string()))
    }

    fn service_mut(&mut self, name: &str) -> Result<&mut MemoryService, BusError> {
        self.services
            .get_mut(name)
            .ok_or_else(|| BusError::ServiceNotFound(name.to_string()))
    }

    fn notify_directory(&mut self, change: &ServiceChange) {
        self.directory_watchers.retain(|_, tx| tx.send(change.clone()).is_ok());
    }

    fn next_id(&mut self) -> u64 {
        self.next_subscription += 1;
        self.next_subscription
    }
}

/// Shared, cloneable in-memory bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<State>>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or re-register) a service and notify directory watchers.
    ///
    /// The statistics built-ins are added to the method map next to `methods`.
    pub fn add_service(&self, name: &str, location: &str, methods: &[(u32, &str)]) {
        let methods: MethodMap = BUILTIN_METHODS
            .iter()
            .chain(methods)
            .map(|&(id, method)| (id, method.to_string()))
            .collect();
        let mut state = self.lock();
        state.services.insert(
            name.to_string(),
            MemoryService {
                info: ServiceInfo {
                    name: name.to_string(),
                    location: location.to_string(),
                },
                methods,
                stats: StatisticsMap::new(),
                stats_enabled: false,
                tracing_enabled: false,
                fail_statistics: false,
                stall_statistics: false,
            },
        );
        state.notify_directory(&ServiceChange::Added(name.to_string()));
    }

    /// Unregister a service and notify directory watchers.
    pub fn remove_service(&self, name: &str) {
        let mut state = self.lock();
        if state.services.remove(name).is_some() {
            state.trace_subscribers.retain(|_, (service, _)| service != name);
            state.notify_directory(&ServiceChange::Removed(name.to_string()));
        }
    }

    /// Overwrite the remote statistic of one method.
    pub fn set_statistic(&self, service: &str, method_id: u32, stat: MethodStatistic) {
        if let Some(srv) = self.lock().services.get_mut(service) {
            srv.stats.insert(method_id, stat);
        }
    }

    /// Account one call of `wall` seconds, if statistics are enabled.
    pub fn record_call(&self, service: &str, method_id: u32, wall: f64) {
        let mut state = self.lock();
        let Some(srv) = state.services.get_mut(service) else {
            return;
        };
        if !srv.stats_enabled {
            return;
        }
        let stat = srv.stats.entry(method_id).or_default();
        if stat.count == 0 || wall < stat.min_wall {
            stat.min_wall = wall;
        }
        if wall > stat.max_wall {
            stat.max_wall = wall;
        }
        stat.count += 1;
        stat.cumulative_wall += wall;
    }

    /// Make `statistics()` fail for this service.
    pub fn fail_statistics(&self, service: &str, fail: bool) {
        if let Some(srv) = self.lock().services.get_mut(service) {
            srv.fail_statistics = fail;
        }
    }

    /// Make `statistics()` never return for this service.
    pub fn stall_statistics(&self, service: &str, stall: bool) {
        if let Some(srv) = self.lock().services.get_mut(service) {
            srv.stall_statistics = stall;
        }
    }

    /// Deliver a trace event to the subscribers of `service`.
    ///
    /// Returns the number of subscribers reached (0 when tracing is disabled).
    pub fn emit_trace(&self, service: &str, event: &TraceEvent) -> usize {
        let state = self.lock();
        let tracing = state.services.get(service).is_some_and(|srv| srv.tracing_enabled);
        if !tracing {
            return 0;
        }
        state
            .trace_subscribers
            .values()
            .filter(|(name, _)| name == service)
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Close every trace stream of `service`, as a remote disconnect would.
    pub fn close_traces(&self, service: &str) {
        self.lock().trace_subscribers.retain(|_, (name, _)| name != service);
    }

    /// Drop the directory connection: open change streams end, new
    /// subscriptions are refused.
    pub fn disconnect_directory(&self) {
        let mut state = self.lock();
        state.directory_closed = true;
        state.directory_watchers.clear();
    }

    /// Flag changes and subscriptions observed so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<BusCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn is_tracing(&self, service: &str) -> bool {
        self.lock().services.get(service).is_some_and(|srv| srv.tracing_enabled)
    }

    #[must_use]
    pub fn is_collecting_statistics(&self, service: &str) -> bool {
        self.lock().services.get(service).is_some_and(|srv| srv.stats_enabled)
    }

    #[must_use]
    pub fn trace_subscriber_count(&self, service: &str) -> usize {
        self.lock().trace_subscribers.values().filter(|(name, _)| name == service).count()
    }

    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.lock().services.keys().cloned().collect()
    }
}

struct DirectoryUnsubscribe {
    state: Arc<Mutex<State>>,
    id: u64,
}

impl Unsubscribe for DirectoryUnsubscribe {
    fn unsubscribe(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.directory_watchers.remove(&self.id);
    }
}

struct TraceUnsubscribe {
    state: Arc<Mutex<State>>,
    id: u64,
    service: String,
}

impl Unsubscribe for TraceUnsubscribe {
    fn unsubscribe(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.trace_subscribers.remove(&self.id);
        state.calls.push(BusCall::UnsubscribeTraces {
            service: self.service.clone(),
        });
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, BusError> {
        let state = self.lock();
        if state.directory_closed {
            return Err(BusError::Disconnected("service directory".to_string()));
        }
        Ok(state.services.values().map(|srv| srv.info.clone()).collect())
    }

    async fn subscribe_service_changes(&self) -> Result<Subscription<ServiceChange>, BusError> {
        let mut state = self.lock();
        if state.directory_closed {
            return Err(BusError::Disconnected("service directory".to_string()));
        }
        let (tx, rx) = unbounded_channel();
        let id = state.next_id();
        state.directory_watchers.insert(id, tx);
        let handle = DirectoryUnsubscribe {
            state: Arc::clone(&self.state),
            id,
        };
        Ok(Subscription::new(rx, handle))
    }

    async fn meta_object(&self, service: &str) -> Result<MethodMap, BusError> {
        Ok(self.lock().service(service)?.methods.clone())
    }

    async fn enable_statistics(&self, service: &str, enabled: bool) -> Result<(), BusError> {
        let mut state = self.lock();
        state.service_mut(service)?.stats_enabled = enabled;
        state.calls.push(BusCall::EnableStatistics {
            service: service.to_string(),
            enabled,
        });
        Ok(())
    }

    async fn clear_statistics(&self, service: &str) -> Result<(), BusError> {
        let mut state = self.lock();
        state.service_mut(service)?.stats.clear();
        state.calls.push(BusCall::ClearStatistics {
            service: service.to_string(),
        });
        Ok(())
    }

    async fn statistics(&self, service: &str) -> Result<StatisticsMap, BusError> {
        {
            let state = self.lock();
            let srv = state.service(service)?;
            if srv.fail_statistics {
                return Err(BusError::Call {
                    service: service.to_string(),
                    reason: "statistics unavailable".to_string(),
                });
            }
            if !srv.stall_statistics {
                return Ok(srv.stats.clone());
            }
        }
        std::future::pending().await
    }

    async fn enable_tracing(&self, service: &str, enabled: bool) -> Result<(), BusError> {
        let mut state = self.lock();
        state.service_mut(service)?.tracing_enabled = enabled;
        state.calls.push(BusCall::EnableTracing {
            service: service.to_string(),
            enabled,
        });
        Ok(())
    }

    async fn subscribe_trace_events(
        &self,
        service: &str,
    ) -> Result<Subscription<TraceEvent>, BusError> {
        let mut state = self.lock();
        state.service(service)?;
        let (tx, rx) = unbounded_channel();
        let id = state.next_id();
        state.trace_subscribers.insert(id, (service.to_string(), tx));
        state.calls.push(BusCall::SubscribeTraces {
            service: service.to_string(),
        });
        let handle = TraceUnsubscribe {
            state: Arc::clone(&self.state),
            id,
            service: service.to_string(),
        };
        Ok(Subscription::new(rx, handle))
    }

    async fn resolve_method_id(&self, service: &str, method: &str) -> Result<u32, BusError> {
        let state = self.lock();
        state
            .service(service)?
            .methods
            .iter()
            .filter(|(_, name)| name.as_str() == method)
            .map(|(&id, _)| id)
            .min()
            .ok_or_else(|| BusError::MethodNotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }
}
