//! Export/refer orchestration
//!
//! [`RpcContext`] ties the pieces together: it encodes configuration into
//! descriptors, resolves extensions by descriptor scheme, and keeps track of
//! every exported service and subscribed reference so they can be torn down
//! together.

pub mod export;
pub mod refer;

pub use export::ServiceExporter;
pub use refer::{ReferenceHandle, ReferenceState, DEFAULT_LOADBALANCE, DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS};

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ReferenceConfig, ServiceConfig};
use crate::error::RpcResult;
use crate::extension::{global_registry, ExtensionRegistry, ServiceHandler};
use crate::settings::RuntimeSettings;

/// Owner of the extension table, the runtime settings and every live
/// export/reference created through it
pub struct RpcContext {
    extensions: Arc<ExtensionRegistry>,
    settings: RuntimeSettings,
    exporters: Mutex<Vec<Arc<ServiceExporter>>>,
    references: Mutex<Vec<Arc<ReferenceHandle>>>,
}

impl RpcContext {
    pub fn new(extensions: Arc<ExtensionRegistry>, settings: RuntimeSettings) -> Self {
        Self {
            extensions,
            settings,
            exporters: Mutex::new(Vec::new()),
            references: Mutex::new(Vec::new()),
        }
    }

    /// Context backed by the process-wide extension registry
    pub fn with_global_registry(settings: RuntimeSettings) -> Self {
        Self::new(global_registry(), settings)
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Export `service`, served by `handler`
    ///
    /// The returned exporter is tracked until [`RpcContext::shutdown`]; a
    /// failed export leaves nothing tracked.
    pub async fn export(
        &self,
        service: ServiceConfig,
        handler: Arc<dyn ServiceHandler>,
    ) -> RpcResult<Arc<ServiceExporter>> {
        let exporter = Arc::new(ServiceExporter::new(
            service,
            handler,
            self.extensions.clone(),
            self.settings.clone(),
        ));
        exporter.export().await?;
        self.exporters.lock().push(exporter.clone());
        Ok(exporter)
    }

    /// Refer `reference` and subscribe to its registries
    pub async fn refer(&self, reference: ReferenceConfig) -> RpcResult<Arc<ReferenceHandle>> {
        let handle = Arc::new(ReferenceHandle::new(
            reference,
            self.extensions.clone(),
            self.settings.clone(),
        ));
        handle.subscribe().await?;
        self.references.lock().push(handle.clone());
        Ok(handle)
    }

    pub fn exported_count(&self) -> usize {
        self.exporters.lock().len()
    }

    pub fn reference_count(&self) -> usize {
        self.references.lock().len()
    }

    /// Destroy every reference, then unexport every service
    ///
    /// All teardown runs even if some of it fails; the first error is
    /// returned.
    pub async fn shutdown(&self) -> RpcResult<()> {
        let references: Vec<_> = std::mem::take(&mut *self.references.lock());
        let exporters: Vec<_> = std::mem::take(&mut *self.exporters.lock());
        info!(
            references = references.len(),
            services = exporters.len(),
            "shutting down"
        );

        let mut results = join_all(references.iter().map(|r| r.destroy())).await;
        results.extend(join_all(exporters.iter().map(|e| e.unexport())).await);

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!(category = %e.category(), "shutdown step failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
