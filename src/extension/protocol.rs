//! Protocol capability
//!
//! A protocol turns a provider descriptor plus a local handler into a bound
//! endpoint ([`Exporter`]), and a provider descriptor discovered through a
//! registry into something callable ([`Invoker`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::RpcResult;

/// One call: method name, positional arguments and string attachments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub attachments: HashMap<String, String>,
}

impl Invocation {
    pub fn new(method: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            arguments,
            attachments: HashMap::new(),
        }
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }
}

/// Local implementation of an exported service
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, invocation: &Invocation) -> RpcResult<Value>;
}

#[async_trait]
impl<F> ServiceHandler for F
where
    F: Fn(&Invocation) -> RpcResult<Value> + Send + Sync,
{
    async fn handle(&self, invocation: &Invocation) -> RpcResult<Value> {
        self(invocation)
    }
}

/// A bound provider endpoint
#[async_trait]
pub trait Exporter: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    /// Release the endpoint; calling it twice is harmless
    async fn unexport(&self) -> RpcResult<()>;
}

/// A callable remote (or in-process) provider
#[async_trait]
pub trait Invoker: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, invocation: &Invocation) -> RpcResult<Value>;

    /// Drop any connection held for this provider
    fn destroy(&self) {}
}

/// Transport implementation selected by descriptor scheme
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Bind `handler` at the endpoint `descriptor` names
    async fn export(
        &self,
        descriptor: &Descriptor,
        handler: Arc<dyn ServiceHandler>,
    ) -> RpcResult<Arc<dyn Exporter>>;

    /// Obtain an invoker for a provider descriptor
    async fn refer(&self, descriptor: &Descriptor) -> RpcResult<Arc<dyn Invoker>>;
}
