//! Extension registry
//!
//! Every pluggable piece of the runtime (protocols, discovery registries,
//! load balances) is looked up by capability and scheme. The scheme normally
//! comes from a descriptor at call time, so the same caller code talks to
//! `dubbo`, `injvm` or anything registered later.
//!
//! # Example
//!
//! ```
//! use orbit_rpc::extension::{ExtensionRegistry, ProtocolCapability, InjvmProtocol};
//! use orbit_rpc::extension::Protocol;
//! use std::sync::Arc;
//!
//! let registry = ExtensionRegistry::empty();
//! registry.register::<ProtocolCapability, _>("injvm", || {
//!     Ok(Arc::new(InjvmProtocol::new()) as Arc<dyn Protocol>)
//! });
//!
//! let first = registry.resolve::<ProtocolCapability>("injvm").unwrap();
//! let second = registry.resolve::<ProtocolCapability>("injvm").unwrap();
//! assert!(Arc::ptr_eq(&first, &second));
//! assert!(registry.resolve::<ProtocolCapability>("dubbo").is_err());
//! ```

pub mod cluster;
pub mod discovery;
pub mod injvm;
pub mod memory;
pub mod protocol;

pub use cluster::{LoadBalance, RandomLoadBalance, RANDOM_SCHEME};
pub use discovery::{Listener, Notification, Registry, RegistryFactory, Subscription};
pub use injvm::{InjvmProtocol, INJVM_SCHEME};
pub use memory::{MemoryRegistry, MemoryRegistryFactory, MEMORY_SCHEME};
pub use protocol::{Exporter, Invocation, Invoker, Protocol, ServiceHandler};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::descriptor::Descriptor;
use crate::error::{RpcError, RpcResult};

/// A kind of pluggable implementation
pub trait Capability: 'static {
    /// Table key, also used in error messages
    const NAME: &'static str;

    /// Trait object handed back by [`ExtensionRegistry::resolve`]
    type Instance: ?Sized + Send + Sync + 'static;
}

pub struct ProtocolCapability;

impl Capability for ProtocolCapability {
    const NAME: &'static str = "protocol";
    type Instance = dyn Protocol;
}

pub struct RegistryCapability;

impl Capability for RegistryCapability {
    const NAME: &'static str = "registry";
    type Instance = dyn RegistryFactory;
}

pub struct LoadBalanceCapability;

impl Capability for LoadBalanceCapability {
    const NAME: &'static str = "loadbalance";
    type Instance = dyn LoadBalance;
}

/// Constructor registered for a capability/scheme pair
pub type Factory<C> =
    Arc<dyn Fn() -> RpcResult<Arc<<C as Capability>::Instance>> + Send + Sync>;

type TableKey = (&'static str, String);

struct Entry {
    /// `Factory<C>` of the capability in the key
    factory: Box<dyn Any + Send + Sync>,
    /// `Arc<C::Instance>` once constructed
    instance: Option<Box<dyn Any + Send + Sync>>,
    generation: u64,
}

/// Capability + scheme → implementation table
///
/// Instances are built lazily on first resolution and cached until the entry
/// is replaced or removed. The lock is held only for lookup and insert;
/// construction runs outside it.
pub struct ExtensionRegistry {
    entries: RwLock<HashMap<TableKey, Entry>>,
    generation: AtomicU64,
}

impl ExtensionRegistry {
    /// Registry with no extensions at all
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Registry pre-populated with the in-process protocol and registry and
    /// the default load balance
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry.register_builtin();
        registry
    }

    fn register_builtin(&self) {
        self.register::<ProtocolCapability, _>(INJVM_SCHEME, || {
            Ok(Arc::new(InjvmProtocol::new()) as Arc<dyn Protocol>)
        });

        self.register::<RegistryCapability, _>(MEMORY_SCHEME, || {
            Ok(Arc::new(MemoryRegistryFactory::new()) as Arc<dyn RegistryFactory>)
        });

        self.register::<LoadBalanceCapability, _>(RANDOM_SCHEME, || {
            Ok(Arc::new(RandomLoadBalance) as Arc<dyn LoadBalance>)
        });
    }

    /// Register a factory, replacing (and dropping the cached instance of)
    /// any previous registration for the same pair
    pub fn register<C, F>(&self, scheme: &str, factory: F)
    where
        C: Capability,
        F: Fn() -> RpcResult<Arc<C::Instance>> + Send + Sync + 'static,
    {
        let factory: Factory<C> = Arc::new(factory);
        let generation = self.next_generation();
        let previous = self.entries.write().insert(
            (C::NAME, normalize(scheme)),
            Entry {
                factory: Box::new(factory),
                instance: None,
                generation,
            },
        );

        if previous.is_some() {
            debug!(capability = C::NAME, scheme, "replaced extension");
        } else {
            trace!(capability = C::NAME, scheme, "registered extension");
        }
    }

    /// Register an already constructed instance
    pub fn register_instance<C: Capability>(&self, scheme: &str, instance: Arc<C::Instance>) {
        let shared = instance.clone();
        let factory: Factory<C> = Arc::new(move || -> RpcResult<Arc<C::Instance>> { Ok(shared.clone()) });
        let generation = self.next_generation();
        self.entries.write().insert(
            (C::NAME, normalize(scheme)),
            Entry {
                factory: Box::new(factory),
                instance: Some(Box::new(instance)),
                generation,
            },
        );
        trace!(capability = C::NAME, scheme, "registered extension instance");
    }

    /// Remove a registration; returns whether one existed
    pub fn unregister<C: Capability>(&self, scheme: &str) -> bool {
        self.entries
            .write()
            .remove(&(C::NAME, normalize(scheme)))
            .is_some()
    }

    pub fn is_registered<C: Capability>(&self, scheme: &str) -> bool {
        self.entries
            .read()
            .contains_key(&(C::NAME, normalize(scheme)))
    }

    /// Registered schemes for a capability, sorted
    pub fn schemes<C: Capability>(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|(capability, _)| *capability == C::NAME)
            .map(|(_, scheme)| scheme.clone())
            .collect();
        schemes.sort();
        schemes
    }

    /// Implementation registered for `scheme`
    ///
    /// Never falls back to a default: an unknown scheme is
    /// [`RpcError::ExtensionNotFound`].
    pub fn resolve<C: Capability>(&self, scheme: &str) -> RpcResult<Arc<C::Instance>> {
        let key = (C::NAME, normalize(scheme));

        let (factory, generation) = {
            let entries = self.entries.read();
            let entry = entries.get(&key).ok_or_else(|| not_found::<C>(scheme))?;
            if let Some(instance) = cached::<C>(entry) {
                return Ok(instance);
            }
            (factory_of::<C>(entry, scheme)?, entry.generation)
        };

        let built = factory()?;

        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(entry) if entry.generation == generation => {
                if let Some(instance) = cached::<C>(entry) {
                    // Another caller won the race; keep a single instance.
                    return Ok(instance);
                }
                entry.instance = Some(Box::new(built.clone()));
                debug!(capability = C::NAME, scheme = %key.1, "constructed extension");
                Ok(built)
            }
            // Replaced or removed while constructing.
            _ => Ok(built),
        }
    }

    /// Adaptive lookup: the scheme is taken from `descriptor`
    pub fn resolve_for<C: Capability>(&self, descriptor: &Descriptor) -> RpcResult<Arc<C::Instance>> {
        self.resolve::<C>(descriptor.scheme())
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn normalize(scheme: &str) -> String {
    scheme.trim().to_ascii_lowercase()
}

fn not_found<C: Capability>(scheme: &str) -> RpcError {
    RpcError::ExtensionNotFound {
        capability: C::NAME.to_string(),
        scheme: scheme.to_string(),
    }
}

fn cached<C: Capability>(entry: &Entry) -> Option<Arc<C::Instance>> {
    entry
        .instance
        .as_ref()
        .and_then(|i| i.downcast_ref::<Arc<C::Instance>>())
        .cloned()
}

fn factory_of<C: Capability>(entry: &Entry, scheme: &str) -> RpcResult<Factory<C>> {
    entry
        .factory
        .downcast_ref::<Factory<C>>()
        .cloned()
        .ok_or_else(|| {
            RpcError::config(format!(
                "extension '{}' for capability '{}' has a mismatched factory",
                scheme,
                C::NAME
            ))
        })
}

/// Global extension registry
static GLOBAL_REGISTRY: Lazy<Arc<ExtensionRegistry>> =
    Lazy::new(|| Arc::new(ExtensionRegistry::with_builtins()));

/// Get the process-wide extension registry
pub fn global_registry() -> Arc<ExtensionRegistry> {
    GLOBAL_REGISTRY.clone()
}
