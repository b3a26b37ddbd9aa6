//! Registry capability
//!
//! The extension table holds one [`RegistryFactory`] per registry scheme; the
//! factory hands out a [`Registry`] client per registry descriptor.
//! Subscriptions return the current provider set and push every later change
//! through the listener channel as a full replacement list.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::descriptor::{Descriptor, GROUP_KEY, VERSION_KEY};
use crate::error::RpcResult;

/// Update delivered to a subscriber
#[derive(Debug, Clone)]
pub enum Notification {
    /// Complete provider list for the subscribed service
    Providers(Vec<Descriptor>),
    /// The registry lost track of the service; keep the last known list
    Failed(String),
}

pub type Listener = mpsc::UnboundedSender<Notification>;

/// Result of a subscribe call
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: u64,
    pub providers: Vec<Descriptor>,
}

/// Client of one discovery registry
#[async_trait]
pub trait Registry: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    async fn register(&self, provider: &Descriptor) -> RpcResult<()>;

    async fn unregister(&self, provider: &Descriptor) -> RpcResult<()>;

    async fn subscribe(&self, consumer: &Descriptor, listener: Listener) -> RpcResult<Subscription>;

    async fn unsubscribe(&self, consumer: &Descriptor, id: u64) -> RpcResult<()>;

    /// Providers currently registered for `consumer`'s service
    async fn lookup(&self, consumer: &Descriptor) -> RpcResult<Vec<Descriptor>>;
}

/// Creates (or reuses) registry clients
pub trait RegistryFactory: Send + Sync {
    fn connect(&self, registry: &Descriptor) -> RpcResult<Arc<dyn Registry>>;
}

/// Whether `provider` serves what `consumer` asks for: same interface, group
/// and version
pub fn is_match(consumer: &Descriptor, provider: &Descriptor) -> bool {
    consumer.interface() == provider.interface()
        && consumer.param(GROUP_KEY) == provider.param(GROUP_KEY)
        && consumer.param(VERSION_KEY) == provider.param(VERSION_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_match() {
        let consumer = Descriptor::parse("consumer:///demo.DemoService?version=1.0").unwrap();
        let provider =
            Descriptor::parse("dubbo://10.0.0.1:20880/demo.DemoService?version=1.0&timeout=5").unwrap();
        assert!(is_match(&consumer, &provider));

        let other_version = provider.clone().with_param(VERSION_KEY, "2.0");
        assert!(!is_match(&consumer, &other_version));

        let grouped = provider.with_param(GROUP_KEY, "blue");
        assert!(!is_match(&consumer, &grouped));
    }

    #[test]
    fn test_custom_path_matches_by_interface() {
        let consumer = Descriptor::parse("consumer:///demo.DemoService").unwrap();
        let provider =
            Descriptor::parse("dubbo://10.0.0.1:20880/demo?interface=demo.DemoService").unwrap();
        assert!(is_match(&consumer, &provider));
    }
}
