//! Live set of remote services and their method maps.
//!
//! The registry is the single source of truth for which services get
//! polled. It is filled once at startup, then kept current by a watcher
//! task consuming the directory's add/remove stream. Readers take a copy
//! with [`ServiceRegistry::list`] and never hold the lock across a bus call.
//!
//! Method maps are fetched once per registration: a service re-added under
//! the same name (typically after a restart) is introspected again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use qitop_common::{ServiceChange, ServiceInfo};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::bus::{with_timeout, Bus, MethodMap, Subscription};
use crate::domain::{Action, MethodId, MonitorError};

const DIRECTORY: &str = "ServiceDirectory";

/// A registered service and the method names of its main object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,

    /// Process location, used to match log/trace streams to this service
    pub location: String,

    pub methods: MethodMap,
}

impl ServiceDescriptor {
    /// `service.method` for a method id, `None` if the id is unknown.
    #[must_use]
    pub fn action(&self, method: MethodId) -> Option<Action> {
        self.methods.get(&method.0).map(|name| Action::new(&self.name, name))
    }
}

#[derive(Default)]
struct Inner {
    services: RwLock<BTreeMap<String, ServiceDescriptor>>,
    subscribers: Mutex<Vec<UnboundedSender<ServiceChange>>>,
}

/// Shared handle on the service set (cheap to clone).
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

impl ServiceRegistry {
    /// Empty registry (services are added with [`ServiceRegistry::insert`]).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to directory changes, then enumerate and introspect every
    /// service already registered.
    ///
    /// The change stream is opened before enumerating so no registration
    /// falls between the two; a duplicate `Added` only re-fetches a map.
    /// Services whose introspection fails are skipped with a warning.
    ///
    /// # Errors
    /// Fails if the change stream cannot be established or the directory
    /// cannot be listed; both are fatal to the session.
    pub async fn connect(
        bus: &dyn Bus,
        timeout: Duration,
    ) -> Result<(Self, Subscription<ServiceChange>), MonitorError> {
        let changes = with_timeout(
            timeout,
            "subscribe service changes",
            DIRECTORY,
            bus.subscribe_service_changes(),
        )
        .await
        .map_err(|err| MonitorError::SubscriptionFailed {
            what: "service changes",
            service: DIRECTORY.to_string(),
            reason: err.to_string(),
        })?;

        let services = with_timeout(timeout, "list services", DIRECTORY, bus.list_services())
            .await
            .map_err(|err| MonitorError::DirectoryDisconnected(err.to_string()))?;

        let registry = Self::new();
        for service in services {
            match fetch_descriptor(bus, service, timeout).await {
                Ok(descriptor) => registry.insert(descriptor),
                Err(err) => warn!("skipping service: {err}"),
            }
        }
        info!("registry initialised with {} services", registry.len());
        Ok((registry, changes))
    }

    /// Copy of the current service set.
    #[must_use]
    pub fn list(&self) -> BTreeMap<String, ServiceDescriptor> {
        self.inner.services.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// # Errors
    /// Returns [`MonitorError::ServiceNotFound`] if `name` is not registered.
    pub fn resolve(&self, name: &str) -> Result<ServiceDescriptor, MonitorError> {
        self.inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| MonitorError::ServiceNotFound(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.services.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream of changes applied to this registry from now on.
    #[must_use]
    pub fn subscribe(&self) -> UnboundedReceiver<ServiceChange> {
        let (tx, rx) = unbounded_channel();
        self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
        rx
    }

    /// Add or replace a service and notify subscribers.
    pub fn insert(&self, descriptor: ServiceDescriptor) {
        let name = descriptor.name.clone();
        self.inner
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), descriptor);
        self.notify(&ServiceChange::Added(name));
    }

    /// Remove a service; returns false if it was not registered.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self
            .inner
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            self.notify(&ServiceChange::Removed(name.to_string()));
        }
        removed
    }

    fn notify(&self, change: &ServiceChange) {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Apply directory changes until cancelled.
    ///
    /// # Errors
    /// Returns [`MonitorError::DirectoryDisconnected`] when the change
    /// stream ends: there is no partial-registry mode.
    pub async fn watch(
        &self,
        bus: Arc<dyn Bus>,
        mut changes: Subscription<ServiceChange>,
        timeout: Duration,
        token: CancellationToken,
    ) -> Result<(), MonitorError> {
        loop {
            let change = tokio::select! {
                biased;
                () = token.cancelled() => break,
                change = changes.next() => change,
            };
            match change {
                Some(ServiceChange::Added(name)) => {
                    if let Err(err) = self.refresh(bus.as_ref(), &name, timeout).await {
                        warn!("failed to register {name}: {err}");
                    }
                }
                Some(ServiceChange::Removed(name)) => {
                    if self.remove(&name) {
                        info!("service removed: {name}");
                    }
                }
                None => {
                    return Err(MonitorError::DirectoryDisconnected(
                        "service change stream closed".to_string(),
                    ));
                }
            }
        }
        changes.cancel();
        debug!("registry watcher stopped");
        Ok(())
    }

    async fn refresh(
        &self,
        bus: &dyn Bus,
        name: &str,
        timeout: Duration,
    ) -> Result<(), MonitorError> {
        let info = with_timeout(timeout, "list services", DIRECTORY, bus.list_services())
            .await?
            .into_iter()
            .find(|service| service.name == name)
            .ok_or_else(|| MonitorError::ServiceNotFound(name.to_string()))?;
        let descriptor = fetch_descriptor(bus, info, timeout).await?;
        info!("service added: {name} ({} methods)", descriptor.methods.len());
        self.insert(descriptor);
        Ok(())
    }
}

async fn fetch_descriptor(
    bus: &dyn Bus,
    info: ServiceInfo,
    timeout: Duration,
) -> Result<ServiceDescriptor, MonitorError> {
    let fetch = bus.meta_object(&info.name);
    let methods = with_timeout(timeout, "meta object", &info.name, fetch).await?;
    Ok(ServiceDescriptor {
        name: info.name,
        location: info.location,
        methods,
    })
}
