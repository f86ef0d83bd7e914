//! # Bus Capabilities
//!
//! The monitor never talks to the wire directly. Everything it needs from
//! the remote object bus goes through the [`Bus`] trait: service discovery,
//! introspection, statistics and trace subscriptions. A bus adapter
//! implements the trait; [`memory::MemoryBus`] is the in-process
//! implementation used by tests and the `--demo` mode.
//!
//! Subscriptions are delivered as a [`Subscription`]: an unbounded stream of
//! items plus an explicit handle that releases the remote side.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use qitop_common::{MethodStatistic, ServiceChange, ServiceInfo, TraceEvent};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::domain::{BusError, MonitorError};

pub mod memory;

pub use memory::{BusCall, MemoryBus};

/// Method id → method name, as found in an object's meta-object.
pub type MethodMap = HashMap<u32, String>;

/// Per-method statistics reported by one service.
pub type StatisticsMap = HashMap<u32, MethodStatistic>;

/// Capability set consumed from the bus/session collaborator.
///
/// Every call addresses the main object of a service by service name.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Enumerate the services currently registered in the directory.
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, BusError>;

    /// Stream of directory add/remove notifications.
    ///
    /// The stream ending means the directory connection was lost.
    async fn subscribe_service_changes(&self) -> Result<Subscription<ServiceChange>, BusError>;

    /// Method map of the service's main object.
    async fn meta_object(&self, service: &str) -> Result<MethodMap, BusError>;

    async fn enable_statistics(&self, service: &str, enabled: bool) -> Result<(), BusError>;

    async fn clear_statistics(&self, service: &str) -> Result<(), BusError>;

    async fn statistics(&self, service: &str) -> Result<StatisticsMap, BusError>;

    async fn enable_tracing(&self, service: &str, enabled: bool) -> Result<(), BusError>;

    /// Stream of trace events of every method of the service's main object.
    async fn subscribe_trace_events(
        &self,
        service: &str,
    ) -> Result<Subscription<TraceEvent>, BusError>;

    async fn resolve_method_id(&self, service: &str, method: &str) -> Result<u32, BusError>;
}

/// Releases the remote side of a subscription.
pub trait Unsubscribe: Send {
    fn unsubscribe(&mut self);
}

/// A live subscription: item stream plus its cancel handle.
///
/// Dropping the subscription unsubscribes as well; [`Subscription::cancel`]
/// makes the release explicit at the call site.
pub struct Subscription<T> {
    events: UnboundedReceiver<T>,
    handle: Option<Box<dyn Unsubscribe>>,
}

impl<T> Subscription<T> {
    pub fn new(events: UnboundedReceiver<T>, handle: impl Unsubscribe + 'static) -> Self {
        Self {
            events,
            handle: Some(Box::new(handle)),
        }
    }

    /// Next item, `None` once the remote side closed the stream.
    pub async fn next(&mut self) -> Option<T> {
        self.events.recv().await
    }

    /// Unsubscribe and drop the stream.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.unsubscribe();
        }
        self.events.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run a bus call with an upper bound on its duration.
///
/// Every remote call made by the monitor goes through here so a hung
/// service cannot stall a whole poll cycle.
///
/// # Errors
/// Returns the bus error of the call, or [`MonitorError::Timeout`].
pub async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &'static str,
    service: &str,
    call: F,
) -> Result<T, MonitorError>
where
    F: Future<Output = Result<T, BusError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(MonitorError::from),
        Err(_) => Err(MonitorError::Timeout {
            operation,
            service: service.to_string(),
            timeout,
        }),
    }
}
