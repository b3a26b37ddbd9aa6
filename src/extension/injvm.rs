//! In-process protocol
//!
//! Export publishes the handler in a table keyed by service key; invokers
//! look the handler up on every call, so a service unexported after refer
//! fails at call time rather than at refer time.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::protocol::{Exporter, Invocation, Invoker, Protocol, ServiceHandler};
use crate::descriptor::Descriptor;
use crate::error::{RpcError, RpcResult};

pub const INJVM_SCHEME: &str = "injvm";

type HandlerTable = Arc<RwLock<HashMap<String, Arc<dyn ServiceHandler>>>>;

#[derive(Default)]
pub struct InjvmProtocol {
    handlers: HandlerTable,
}

impl InjvmProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service keys currently exported, sorted
    pub fn exported_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Protocol for InjvmProtocol {
    async fn export(
        &self,
        descriptor: &Descriptor,
        handler: Arc<dyn ServiceHandler>,
    ) -> RpcResult<Arc<dyn Exporter>> {
        let key = descriptor.service_key();
        {
            let mut handlers = self.handlers.write();
            if handlers.contains_key(&key) {
                return Err(RpcError::AlreadyExported(key));
            }
            handlers.insert(key.clone(), handler);
        }

        debug!(service = %key, "exported in-process");
        Ok(Arc::new(InjvmExporter {
            descriptor: descriptor.clone(),
            key,
            handlers: self.handlers.clone(),
        }))
    }

    async fn refer(&self, descriptor: &Descriptor) -> RpcResult<Arc<dyn Invoker>> {
        Ok(Arc::new(InjvmInvoker {
            descriptor: descriptor.clone(),
            key: descriptor.service_key(),
            handlers: self.handlers.clone(),
        }))
    }
}

struct InjvmExporter {
    descriptor: Descriptor,
    key: String,
    handlers: HandlerTable,
}

#[async_trait]
impl Exporter for InjvmExporter {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn unexport(&self) -> RpcResult<()> {
        if self.handlers.write().remove(&self.key).is_some() {
            debug!(service = %self.key, "unexported in-process");
        }
        Ok(())
    }
}

struct InjvmInvoker {
    descriptor: Descriptor,
    key: String,
    handlers: HandlerTable,
}

#[async_trait]
impl Invoker for InjvmInvoker {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.handlers.read().contains_key(&self.key)
    }

    async fn invoke(&self, invocation: &Invocation) -> RpcResult<Value> {
        let handler = self
            .handlers
            .read()
            .get(&self.key)
            .cloned()
            .ok_or_else(|| RpcError::Transport {
                endpoint: self.descriptor.to_string(),
                message: format!("no in-process export for '{}'", self.key),
            })?;
        handler.handle(invocation).await
    }
}
