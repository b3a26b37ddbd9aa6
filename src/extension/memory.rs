//! In-process registry
//!
//! One [`MemoryRegistry`] per registry address, shared by every client that
//! connects to the same address through the same factory.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::discovery::{is_match, Listener, Notification, Registry, RegistryFactory, Subscription};
use crate::descriptor::Descriptor;
use crate::error::RpcResult;

pub const MEMORY_SCHEME: &str = "memory";

#[derive(Default)]
pub struct MemoryRegistryFactory {
    registries: Mutex<HashMap<String, Arc<MemoryRegistry>>>,
}

impl MemoryRegistryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry at `address`, created on first use
    pub fn registry(&self, descriptor: &Descriptor) -> Arc<MemoryRegistry> {
        self.registries
            .lock()
            .entry(descriptor.address())
            .or_insert_with(|| Arc::new(MemoryRegistry::new(descriptor.clone())))
            .clone()
    }
}

impl RegistryFactory for MemoryRegistryFactory {
    fn connect(&self, registry: &Descriptor) -> RpcResult<Arc<dyn Registry>> {
        Ok(self.registry(registry))
    }
}

struct Subscriber {
    consumer: Descriptor,
    listener: Listener,
}

#[derive(Default)]
struct MemoryState {
    providers: Vec<Descriptor>,
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
}

impl MemoryState {
    fn matching(&self, consumer: &Descriptor) -> Vec<Descriptor> {
        self.providers
            .iter()
            .filter(|p| is_match(consumer, p))
            .cloned()
            .collect()
    }

    /// Push the new list to every subscriber of `provider`'s service,
    /// dropping subscribers whose receiver is gone
    fn notify(&mut self, provider: &Descriptor) {
        let mut closed = Vec::new();
        for (id, subscriber) in &self.subscribers {
            if !is_match(&subscriber.consumer, provider) {
                continue;
            }
            let providers = self.matching(&subscriber.consumer);
            if subscriber.listener.send(Notification::Providers(providers)).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            trace!(id, "dropping closed subscriber");
            self.subscribers.remove(&id);
        }
    }
}

pub struct MemoryRegistry {
    descriptor: Descriptor,
    state: Mutex<MemoryState>,
}

impl MemoryRegistry {
    pub fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Every registered provider, in registration order
    pub fn registered(&self) -> Vec<Descriptor> {
        self.state.lock().providers.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Tell every subscriber the registry lost its state
    pub fn notify_failure(&self, message: &str) {
        let state = self.state.lock();
        for subscriber in state.subscribers.values() {
            let _ = subscriber
                .listener
                .send(Notification::Failed(message.to_string()));
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn register(&self, provider: &Descriptor) -> RpcResult<()> {
        let mut state = self.state.lock();
        if !state.providers.contains(provider) {
            state.providers.push(provider.clone());
            debug!(registry = %self.descriptor.address(), provider = %provider, "registered");
            state.notify(provider);
        }
        Ok(())
    }

    async fn unregister(&self, provider: &Descriptor) -> RpcResult<()> {
        let mut state = self.state.lock();
        let before = state.providers.len();
        state.providers.retain(|p| p != provider);
        if state.providers.len() != before {
            debug!(registry = %self.descriptor.address(), provider = %provider, "unregistered");
            state.notify(provider);
        }
        Ok(())
    }

    async fn subscribe(&self, consumer: &Descriptor, listener: Listener) -> RpcResult<Subscription> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let providers = state.matching(consumer);
        state.subscribers.insert(
            id,
            Subscriber {
                consumer: consumer.clone(),
                listener,
            },
        );
        debug!(registry = %self.descriptor.address(), consumer = %consumer, id, "subscribed");
        Ok(Subscription { id, providers })
    }

    async fn unsubscribe(&self, _consumer: &Descriptor, id: u64) -> RpcResult<()> {
        if self.state.lock().subscribers.remove(&id).is_some() {
            debug!(registry = %self.descriptor.address(), id, "unsubscribed");
        }
        Ok(())
    }

    async fn lookup(&self, consumer: &Descriptor) -> RpcResult<Vec<Descriptor>> {
        Ok(self.state.lock().matching(consumer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry_descriptor() -> Descriptor {
        Descriptor::parse("memory://local:1/RegistryService").unwrap()
    }

    fn provider(port: u16) -> Descriptor {
        Descriptor::new("injvm", "127.0.0.1", port, "demo.DemoService")
            .unwrap()
            .with_param("interface", "demo.DemoService")
    }

    fn consumer() -> Descriptor {
        Descriptor::parse("consumer:///demo.DemoService?interface=demo.DemoService").unwrap()
    }

    #[test]
    fn test_factory_shares_registry_per_address() {
        let factory = MemoryRegistryFactory::new();
        let a = factory.registry(&registry_descriptor());
        let b = factory.registry(&registry_descriptor().with_param("timeout", "10"));
        let c = factory.registry(&Descriptor::parse("memory://local:2").unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_subscribe_gets_initial_set_then_updates() {
        let registry = MemoryRegistry::new(registry_descriptor());
        registry.register(&provider(1)).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = registry.subscribe(&consumer(), tx).await.unwrap();
        assert_eq!(sub.providers, vec![provider(1)]);

        registry.register(&provider(2)).await.unwrap();
        match rx.recv().await.unwrap() {
            Notification::Providers(list) => assert_eq!(list.len(), 2),
            other => panic!("Expected providers, got {:?}", other),
        }

        registry.unregister(&provider(1)).await.unwrap();
        match rx.recv().await.unwrap() {
            Notification::Providers(list) => assert_eq!(list, vec![provider(2)]),
            other => panic!("Expected providers, got {:?}", other),
        }

        registry.unsubscribe(&consumer(), sub.id).await.unwrap();
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = MemoryRegistry::new(registry_descriptor());
        registry.register(&provider(1)).await.unwrap();
        registry.register(&provider(1)).await.unwrap();
        assert_eq!(registry.registered().len(), 1);

        registry.unregister(&provider(1)).await.unwrap();
        registry.unregister(&provider(1)).await.unwrap();
        assert!(registry.registered().is_empty());
    }

    #[tokio::test]
    async fn test_other_services_not_notified() {
        let registry = MemoryRegistry::new(registry_descriptor());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe(&consumer(), tx).await.unwrap();

        let unrelated = Descriptor::parse("injvm://127.0.0.1/demo.Other").unwrap();
        registry.register(&unrelated).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(registry.lookup(&consumer()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_listener_is_dropped() {
        let registry = MemoryRegistry::new(registry_descriptor());
        let (tx, rx) = mpsc::unbounded_channel();
        registry.subscribe(&consumer(), tx).await.unwrap();
        drop(rx);

        registry.register(&provider(1)).await.unwrap();
        assert_eq!(registry.subscriber_count(), 0);
    }
}
