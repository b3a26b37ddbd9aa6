//! Service reference lifecycle
//!
//! `Unreferenced → Subscribed → Invoking`. Subscribing yields the initial
//! provider set of every registry; later changes arrive on a channel per
//! registry and are folded into one immutable snapshot that invocations load
//! without locking.

use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::export::bounded;
use crate::config::ReferenceConfig;
use crate::descriptor::{Descriptor, LOADBALANCE_KEY, PROTOCOL_KEY, REGISTRY_KEY, RETRIES_KEY, TIMEOUT_KEY};
use crate::encoder::encode_reference;
use crate::error::{RpcError, RpcResult};
use crate::extension::{
    ExtensionRegistry, Invocation, Invoker, LoadBalanceCapability, Notification, ProtocolCapability,
    Registry, RegistryCapability, RANDOM_SCHEME,
};
use crate::settings::RuntimeSettings;

pub const DEFAULT_LOADBALANCE: &str = RANDOM_SCHEME;
pub const DEFAULT_RETRIES: u64 = 2;
pub const DEFAULT_TIMEOUT_MS: u64 = 1_000;

/// Registry attribute that makes a registry register-only
const SUBSCRIBE_KEY: &str = "subscribe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    Unreferenced,
    Subscribed,
    /// Subscribed with at least one call in flight
    Invoking,
}

type Snapshot = Arc<Vec<Arc<dyn Invoker>>>;

struct DirectoryState {
    /// Latest provider list per registry, by subscription index
    per_registry: Vec<Vec<Descriptor>>,
    invokers: HashMap<Descriptor, Arc<dyn Invoker>>,
}

/// Provider set of one reference, merged over all its registries
pub(crate) struct ProviderDirectory {
    service: String,
    protocol_filter: Option<String>,
    extensions: Arc<ExtensionRegistry>,
    state: Mutex<DirectoryState>,
    snapshot: ArcSwap<Vec<Arc<dyn Invoker>>>,
}

impl ProviderDirectory {
    pub(crate) fn new(
        service: String,
        protocol_filter: Option<String>,
        extensions: Arc<ExtensionRegistry>,
        registries: usize,
    ) -> Self {
        Self {
            service,
            protocol_filter,
            extensions,
            state: Mutex::new(DirectoryState {
                per_registry: vec![Vec::new(); registries],
                invokers: HashMap::new(),
            }),
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.snapshot.load_full()
    }

    pub(crate) async fn apply(&self, index: usize, notification: Notification) {
        match notification {
            Notification::Providers(providers) => self.replace(index, providers).await,
            Notification::Failed(message) => {
                warn!(
                    service = %self.service,
                    "registry notification failed, keeping last provider set: {}", message
                );
            }
        }
    }

    /// Replace one registry's list and publish the merged snapshot
    pub(crate) async fn replace(&self, index: usize, providers: Vec<Descriptor>) {
        let mut state = self.state.lock().await;
        if index >= state.per_registry.len() {
            state.per_registry.resize(index + 1, Vec::new());
        }
        state.per_registry[index] = providers;

        let mut merged: Vec<Descriptor> = Vec::new();
        for provider in state.per_registry.iter().flatten() {
            let wanted = match &self.protocol_filter {
                Some(protocol) => provider.scheme() == protocol,
                None => true,
            };
            if wanted && !merged.contains(provider) {
                merged.push(provider.clone());
            }
        }

        let mut next: HashMap<Descriptor, Arc<dyn Invoker>> = HashMap::with_capacity(merged.len());
        let mut invokers: Vec<Arc<dyn Invoker>> = Vec::with_capacity(merged.len());
        for provider in merged {
            let invoker = match state.invokers.remove(&provider) {
                Some(existing) => existing,
                None => match self.refer(&provider).await {
                    Ok(invoker) => invoker,
                    Err(e) => {
                        warn!(service = %self.service, provider = %provider, "cannot refer provider: {}", e);
                        continue;
                    }
                },
            };
            invokers.push(invoker.clone());
            next.insert(provider, invoker);
        }

        for (provider, stale) in state.invokers.drain() {
            trace!(provider = %provider, "dropping provider");
            stale.destroy();
        }
        state.invokers = next;

        debug!(service = %self.service, providers = invokers.len(), "provider set updated");
        self.snapshot.store(Arc::new(invokers));
    }

    async fn refer(&self, provider: &Descriptor) -> RpcResult<Arc<dyn Invoker>> {
        let protocol = self.extensions.resolve_for::<ProtocolCapability>(provider)?;
        protocol.refer(provider).await
    }

    pub(crate) async fn clear(&self) {
        let mut state = self.state.lock().await;
        for (_, invoker) in state.invokers.drain() {
            invoker.destroy();
        }
        state.per_registry.iter_mut().for_each(Vec::clear);
        self.snapshot.store(Arc::new(Vec::new()));
    }
}

struct ActiveSubscription {
    registry: Arc<dyn Registry>,
    consumer: Descriptor,
    id: u64,
    listener: JoinHandle<()>,
}

/// Reference handle for one remote service
pub struct ReferenceHandle {
    reference: ReferenceConfig,
    extensions: Arc<ExtensionRegistry>,
    settings: RuntimeSettings,
    name: String,
    /// Lock-free view of the directory for invocations
    active: ArcSwap<Option<(Arc<ProviderDirectory>, Descriptor)>>,
    subscriptions: Mutex<Vec<ActiveSubscription>>,
    subscribed: AtomicBool,
    in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for ReferenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceHandle")
            .field("service", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ReferenceHandle {
    pub fn new(reference: ReferenceConfig, extensions: Arc<ExtensionRegistry>, settings: RuntimeSettings) -> Self {
        let name = reference
            .interface
            .clone()
            .unwrap_or_else(|| "<unnamed>".to_string());
        Self {
            reference,
            extensions,
            settings,
            name,
            active: ArcSwap::from_pointee(None),
            subscriptions: Mutex::new(Vec::new()),
            subscribed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> &ReferenceConfig {
        &self.reference
    }

    pub fn state(&self) -> ReferenceState {
        if !self.subscribed.load(Ordering::SeqCst) {
            ReferenceState::Unreferenced
        } else if self.in_flight.load(Ordering::SeqCst) > 0 {
            ReferenceState::Invoking
        } else {
            ReferenceState::Subscribed
        }
    }

    /// Descriptors of the providers in the current snapshot
    pub fn providers(&self) -> Vec<Descriptor> {
        let active = self.active.load();
        match &**active {
            Some((directory, _)) => directory
                .snapshot()
                .iter()
                .map(|i| i.descriptor().clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Subscribe to every registry of the reference
    ///
    /// Zero providers is not an error. Calling it while subscribed does
    /// nothing.
    pub async fn subscribe(&self) -> RpcResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if self.subscribed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let consumers = encode_reference(&self.reference)?;
        let directory = Arc::new(ProviderDirectory::new(
            self.name.clone(),
            consumers[0].param(PROTOCOL_KEY).map(str::to_string),
            self.extensions.clone(),
            consumers.len(),
        ));

        for (index, consumer) in consumers.iter().enumerate() {
            match self.subscribe_one(index, consumer, &directory).await {
                Ok(Some(subscription)) => subscriptions.push(subscription),
                Ok(None) => {}
                Err(e) => {
                    warn!(service = %self.name, category = %e.category(), "subscribe failed: {}", e);
                    for subscription in subscriptions.drain(..) {
                        self.cancel(subscription).await.ok();
                    }
                    directory.clear().await;
                    return Err(e);
                }
            }
        }

        let consumer = consumers[0].clone().without_param(REGISTRY_KEY);
        self.active.store(Arc::new(Some((directory.clone(), consumer))));
        self.subscribed.store(true, Ordering::SeqCst);

        info!(
            service = %self.name,
            registries = subscriptions.len(),
            providers = directory.snapshot().len(),
            "reference subscribed"
        );
        Ok(())
    }

    async fn subscribe_one(
        &self,
        index: usize,
        descriptor: &Descriptor,
        directory: &Arc<ProviderDirectory>,
    ) -> RpcResult<Option<ActiveSubscription>> {
        let registry_descriptor = descriptor.registry()?.ok_or_else(|| {
            RpcError::config(format!("descriptor '{}' names no registry", descriptor))
        })?;
        if registry_descriptor.param_bool(SUBSCRIBE_KEY) == Some(false) {
            debug!(registry = %registry_descriptor.address(), "registry is register-only, skipping");
            return Ok(None);
        }

        let registry = self
            .extensions
            .resolve_for::<RegistryCapability>(&registry_descriptor)?
            .connect(&registry_descriptor)?;
        let consumer = descriptor.clone().without_param(REGISTRY_KEY);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = bounded(
            format!("subscribe at {}", registry_descriptor.address()),
            self.settings.subscribe_timeout(),
            registry.subscribe(&consumer, tx),
        )
        .await?;

        directory.replace(index, subscription.providers).await;

        let listener_directory = directory.clone();
        let listener = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                listener_directory.apply(index, notification).await;
            }
        });

        Ok(Some(ActiveSubscription {
            registry,
            consumer,
            id: subscription.id,
            listener,
        }))
    }

    async fn cancel(&self, subscription: ActiveSubscription) -> RpcResult<()> {
        subscription.listener.abort();
        bounded(
            format!("unsubscribe at {}", subscription.registry.descriptor().address()),
            self.settings.subscribe_timeout(),
            subscription
                .registry
                .unsubscribe(&subscription.consumer, subscription.id),
        )
        .await
    }

    /// Call `method` on one provider picked by the load balance
    pub async fn invoke(&self, method: &str, arguments: Vec<Value>) -> RpcResult<Value> {
        self.invoke_with(Invocation::new(method, arguments)).await
    }

    pub async fn invoke_with(&self, invocation: Invocation) -> RpcResult<Value> {
        let active = self.active.load_full();
        let (directory, consumer) = match &*active {
            Some(active) => active,
            None => return Err(RpcError::NotSubscribed(self.name.clone())),
        };
        let _guard = InFlight::enter(&self.in_flight);

        let snapshot = directory.snapshot();
        if snapshot.is_empty() {
            return Err(RpcError::NoAvailableProvider {
                service: self.name.clone(),
            });
        }

        let loadbalance = self
            .extensions
            .resolve::<LoadBalanceCapability>(consumer.param_or(LOADBALANCE_KEY, DEFAULT_LOADBALANCE))?;
        let retries = consumer.param_u64(RETRIES_KEY).unwrap_or(DEFAULT_RETRIES);
        let timeout = Duration::from_millis(consumer.param_u64(TIMEOUT_KEY).unwrap_or(DEFAULT_TIMEOUT_MS));

        let mut tried: Vec<Arc<dyn Invoker>> = Vec::new();
        let mut last_error = None;

        for attempt in 0..=retries {
            let candidates: Vec<Arc<dyn Invoker>> = snapshot
                .iter()
                .filter(|i| i.is_available() && !tried.iter().any(|t| Arc::ptr_eq(t, i)))
                .cloned()
                .collect();
            let Some(invoker) = loadbalance.select(&candidates, &invocation) else {
                break;
            };

            let outcome = bounded(
                format!("invoke {}.{}", self.name, invocation.method),
                timeout,
                invoker.invoke(&invocation),
            )
            .await;

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() => {
                    warn!(
                        service = %self.name,
                        provider = %invoker.descriptor().address(),
                        attempt,
                        "invocation failed, trying next provider: {}", e
                    );
                    tried.push(invoker);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RpcError::NoAvailableProvider {
            service: self.name.clone(),
        }))
    }

    /// Unsubscribe everywhere and drop every provider; back to `Unreferenced`
    pub async fn destroy(&self) -> RpcResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if !self.subscribed.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let previous = self.active.swap(Arc::new(None));

        let mut first_error = None;
        for subscription in subscriptions.drain(..) {
            if let Err(e) = self.cancel(subscription).await {
                warn!(service = %self.name, "unsubscribe failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some((directory, _)) = &*previous {
            directory.clear().await;
        }

        info!(service = %self.name, "reference destroyed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
