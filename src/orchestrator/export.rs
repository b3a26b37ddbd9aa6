//! Service export lifecycle
//!
//! `Unexported → Exported → Unexported`. Export binds every distinct provider
//! endpoint once, then registers the provider descriptor with each registry.
//! Any failure rolls back everything done so far, so a service is either
//! visible in every registry it names or in none.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::descriptor::{Descriptor, REGISTRY_KEY};
use crate::encoder::encode_service;
use crate::error::{RpcError, RpcResult};
use crate::extension::{
    Exporter, ExtensionRegistry, ProtocolCapability, Registry, RegistryCapability, ServiceHandler,
};
use crate::settings::RuntimeSettings;

/// Registry attribute that makes a registry subscribe-only
const REGISTER_KEY: &str = "register";

struct Registration {
    registry: Arc<dyn Registry>,
    provider: Descriptor,
}

/// Everything a successful (or in-progress) export holds
#[derive(Default)]
struct ExportedSet {
    exporters: Vec<Arc<dyn Exporter>>,
    bound: HashSet<Descriptor>,
    registrations: Vec<Registration>,
}

enum ExportState {
    Unexported,
    Exported(ExportedSet),
}

/// Export handle for one service
pub struct ServiceExporter {
    service: ServiceConfig,
    handler: Arc<dyn ServiceHandler>,
    extensions: Arc<ExtensionRegistry>,
    settings: RuntimeSettings,
    name: String,
    state: Mutex<ExportState>,
}

impl fmt::Debug for ServiceExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceExporter")
            .field("service", &self.name)
            .finish_non_exhaustive()
    }
}

impl ServiceExporter {
    pub fn new(
        service: ServiceConfig,
        handler: Arc<dyn ServiceHandler>,
        extensions: Arc<ExtensionRegistry>,
        settings: RuntimeSettings,
    ) -> Self {
        let name = service
            .interface
            .clone()
            .unwrap_or_else(|| "<unnamed>".to_string());
        Self {
            service,
            handler,
            extensions,
            settings,
            name,
            state: Mutex::new(ExportState::Unexported),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    pub async fn is_exported(&self) -> bool {
        matches!(*self.state.lock().await, ExportState::Exported(_))
    }

    /// Provider descriptors currently bound, empty when unexported
    pub async fn exported_descriptors(&self) -> Vec<Descriptor> {
        match &*self.state.lock().await {
            ExportState::Exported(set) => set
                .exporters
                .iter()
                .map(|e| e.descriptor().clone())
                .collect(),
            ExportState::Unexported => Vec::new(),
        }
    }

    /// Export over every protocol × registry pair
    ///
    /// Returns the encoded descriptors (one per pair). On failure nothing
    /// stays bound or registered; if some pairs had already succeeded the
    /// error is [`RpcError::PartialExport`].
    pub async fn export(&self) -> RpcResult<Vec<Descriptor>> {
        let mut state = self.state.lock().await;
        if matches!(*state, ExportState::Exported(_)) {
            return Err(RpcError::AlreadyExported(self.name.clone()));
        }

        let descriptors = encode_service(&self.service, &self.settings)?;
        let total = descriptors.len();
        let mut set = ExportedSet::default();

        for (index, descriptor) in descriptors.iter().enumerate() {
            if let Err(e) = self.export_pair(descriptor, &mut set).await {
                warn!(
                    service = %self.name,
                    descriptor = %descriptor,
                    category = %e.category(),
                    "export failed, rolling back: {}", e
                );
                if let Err(rollback) = self.teardown(set).await {
                    warn!(service = %self.name, "rollback incomplete: {}", rollback);
                }
                return Err(if index > 0 {
                    RpcError::PartialExport {
                        service: self.name.clone(),
                        succeeded: index,
                        total,
                        source: Box::new(e),
                    }
                } else {
                    e
                });
            }
        }

        info!(
            service = %self.name,
            endpoints = set.exporters.len(),
            registrations = set.registrations.len(),
            "service exported"
        );
        *state = ExportState::Exported(set);
        Ok(descriptors)
    }

    async fn export_pair(&self, descriptor: &Descriptor, set: &mut ExportedSet) -> RpcResult<()> {
        let provider = descriptor.clone().without_param(REGISTRY_KEY);

        if !set.bound.contains(&provider) {
            let protocol = self.extensions.resolve_for::<ProtocolCapability>(&provider)?;
            let exporter = bounded(
                format!("bind {}", provider.address()),
                self.settings.bind_timeout(),
                protocol.export(&provider, self.handler.clone()),
            )
            .await?;
            debug!(service = %self.name, endpoint = %provider.address(), "bound");
            set.exporters.push(exporter);
            set.bound.insert(provider.clone());
        }

        let registry_descriptor = descriptor.registry()?.ok_or_else(|| {
            RpcError::config(format!("descriptor '{}' names no registry", descriptor))
        })?;
        if registry_descriptor.param_bool(REGISTER_KEY) == Some(false) {
            debug!(registry = %registry_descriptor.address(), "registry is subscribe-only, skipping");
            return Ok(());
        }

        let registry = self
            .extensions
            .resolve_for::<RegistryCapability>(&registry_descriptor)?
            .connect(&registry_descriptor)?;
        bounded(
            format!("register at {}", registry_descriptor.address()),
            self.settings.register_timeout(),
            registry.register(&provider),
        )
        .await?;
        debug!(service = %self.name, registry = %registry_descriptor.address(), "registered");

        set.registrations.push(Registration { registry, provider });
        Ok(())
    }

    /// Unregister everywhere, then release every endpoint
    ///
    /// Safe to call when not exported or after a failed export.
    pub async fn unexport(&self) -> RpcResult<()> {
        let mut state = self.state.lock().await;
        let set = match std::mem::replace(&mut *state, ExportState::Unexported) {
            ExportState::Exported(set) => set,
            ExportState::Unexported => return Ok(()),
        };

        let result = self.teardown(set).await;
        info!(service = %self.name, "service unexported");
        result
    }

    /// Every step runs even if an earlier one fails; the first error is returned
    async fn teardown(&self, set: ExportedSet) -> RpcResult<()> {
        let mut first_error = None;
        let bound = self.settings.register_timeout();

        for registration in set.registrations.iter().rev() {
            let outcome = bounded(
                format!("unregister at {}", registration.registry.descriptor().address()),
                bound,
                registration.registry.unregister(&registration.provider),
            )
            .await;
            if let Err(e) = outcome {
                warn!(service = %self.name, "unregister failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        for exporter in set.exporters.iter().rev() {
            if let Err(e) = exporter.unexport().await {
                warn!(service = %self.name, endpoint = %exporter.descriptor().address(), "unbind failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Run `future` under `bound`, surfacing expiry as [`RpcError::Timeout`]
pub(crate) async fn bounded<T, F>(operation: String, bound: Duration, future: F) -> RpcResult<T>
where
    F: std::future::Future<Output = RpcResult<T>>,
{
    match tokio::time::timeout(bound, future).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::timeout(operation, bound)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProtocolConfig, RegistryConfig};
    use crate::extension::{InjvmProtocol, Invocation, MemoryRegistryFactory, Protocol, RegistryFactory};
    use serde_json::Value;

    fn handler() -> Arc<dyn ServiceHandler> {
        Arc::new(|_: &Invocation| -> RpcResult<Value> { Ok(Value::Null) })
    }

    struct Fixture {
        extensions: Arc<ExtensionRegistry>,
        protocol: Arc<InjvmProtocol>,
        registries: Arc<MemoryRegistryFactory>,
    }

    fn fixture() -> Fixture {
        let extensions = Arc::new(ExtensionRegistry::with_builtins());
        let protocol = Arc::new(InjvmProtocol::new());
        let registries = Arc::new(MemoryRegistryFactory::new());
        extensions.register_instance::<ProtocolCapability>("injvm", protocol.clone() as Arc<dyn Protocol>);
        extensions.register_instance::<RegistryCapability>("memory", registries.clone() as Arc<dyn RegistryFactory>);
        Fixture {
            extensions,
            protocol,
            registries,
        }
    }

    fn service() -> ServiceConfig {
        ServiceConfig::new("demo.DemoService")
            .with_protocol(Arc::new(ProtocolConfig::new("injvm")))
            .with_registry(Arc::new(RegistryConfig::new("memory", "local:1")))
    }

    #[tokio::test]
    async fn test_export_and_unexport() {
        let f = fixture();
        let exporter = ServiceExporter::new(service(), handler(), f.extensions.clone(), RuntimeSettings::default());

        let descriptors = exporter.export().await.unwrap();
        assert_eq!(descriptors.len(), 1);
        assert!(exporter.is_exported().await);
        assert_eq!(f.protocol.exported_keys(), vec!["demo.DemoService".to_string()]);

        let registry_descriptor = descriptors[0].registry().unwrap().unwrap();
        let registry = f.registries.registry(&registry_descriptor);
        assert_eq!(registry.registered().len(), 1);
        assert!(!registry.registered()[0].has_param(REGISTRY_KEY));

        exporter.unexport().await.unwrap();
        exporter.unexport().await.unwrap();
        assert!(!exporter.is_exported().await);
        assert!(registry.registered().is_empty());
        assert!(f.protocol.exported_keys().is_empty());
    }

    #[tokio::test]
    async fn test_double_export_rejected() {
        let f = fixture();
        let exporter = ServiceExporter::new(service(), handler(), f.extensions, RuntimeSettings::default());
        exporter.export().await.unwrap();
        assert!(matches!(exporter.export().await, Err(RpcError::AlreadyExported(_))));
    }

    #[tokio::test]
    async fn test_bind_once_per_endpoint() {
        let f = fixture();
        let service = service().with_registry(Arc::new(RegistryConfig::new("memory", "local:2")));
        let exporter = ServiceExporter::new(service, handler(), f.extensions, RuntimeSettings::default());

        let descriptors = exporter.export().await.unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(exporter.exported_descriptors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_only_registry_skipped() {
        let f = fixture();
        let registry = RegistryConfig {
            register: Some(false),
            ..RegistryConfig::new("memory", "local:1")
        };
        let service = ServiceConfig::new("demo.DemoService")
            .with_protocol(Arc::new(ProtocolConfig::new("injvm")))
            .with_registry(Arc::new(registry));
        let exporter = ServiceExporter::new(service, handler(), f.extensions, RuntimeSettings::default());

        let descriptors = exporter.export().await.unwrap();
        let registry_descriptor = descriptors[0].registry().unwrap().unwrap();
        assert!(f.registries.registry(&registry_descriptor).registered().is_empty());
        assert!(exporter.is_exported().await);
    }

    #[tokio::test]
    async fn test_unknown_protocol_fails_without_side_effects() {
        let f = fixture();
        let service = ServiceConfig::new("demo.DemoService")
            .with_protocol(Arc::new(ProtocolConfig::new("dubbo").with_port(20880)))
            .with_registry(Arc::new(RegistryConfig::new("memory", "local:1")));
        let exporter = ServiceExporter::new(service, handler(), f.extensions, RuntimeSettings::default());

        let err = exporter.export().await.unwrap_err();
        assert!(err.is_extension_not_found());
        assert!(!exporter.is_exported().await);
        assert!(f.protocol.exported_keys().is_empty());
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let never = std::future::pending::<RpcResult<()>>();
        let err = bounded("bind".to_string(), Duration::from_millis(10), never)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
    }
}
