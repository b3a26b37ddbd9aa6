//! Service and reference declarations

use serde::Deserialize;
use std::sync::Arc;

use super::application::{ApplicationConfig, ModuleConfig, MonitorConfig};
use super::defaults::{ConsumerConfig, ProviderConfig};
use super::endpoint::{ProtocolConfig, RegistryConfig};
use super::AttributeSource;
use crate::error::{RpcError, RpcResult};

/// A local service to export
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServiceConfig {
    /// Interface identifier; required
    pub interface: Option<String>,
    /// Descriptor path, defaults to the interface
    pub path: Option<String>,
    pub version: Option<String>,
    pub group: Option<String>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub loadbalance: Option<String>,
    pub cluster: Option<String>,
    pub weight: Option<u32>,
    pub delay: Option<i64>,
    pub token: Option<String>,
    pub deprecated: Option<bool>,
    pub dynamic: Option<bool>,
    pub accesslog: Option<String>,
    pub filter: Option<String>,
    pub executes: Option<u32>,

    #[serde(skip)]
    pub application: Option<Arc<ApplicationConfig>>,
    #[serde(skip)]
    pub module: Option<Arc<ModuleConfig>>,
    #[serde(skip)]
    pub monitor: Option<Arc<MonitorConfig>>,
    #[serde(skip)]
    pub provider: Option<Arc<ProviderConfig>>,
    #[serde(skip)]
    pub protocols: Vec<Arc<ProtocolConfig>>,
    #[serde(skip)]
    pub registries: Vec<Arc<RegistryConfig>>,
}

impl_attributes!(
    ServiceConfig, "service",
    params {
        version: "version" => "version",
        group: "group" => "group",
        timeout: "timeout" => "timeout",
        retries: "retries" => "retries",
        loadbalance: "loadbalance" => "loadbalance",
        cluster: "cluster" => "cluster",
        weight: "weight" => "weight",
        delay: "delay" => "delay",
        token: "token" => "token",
        deprecated: "deprecated" => "deprecated" [default false],
        dynamic: "dynamic" => "dynamic" [default true],
        accesslog: "accesslog" => "accesslog",
        filter: "filter" => "service.filter",
        executes: "executes" => "executes",
    }
    local {
        interface: "interface",
        path: "path",
    }
);

impl ServiceConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: Some(interface.into()),
            ..Default::default()
        }
    }

    pub fn with_application(mut self, application: Arc<ApplicationConfig>) -> Self {
        self.application = Some(application);
        self
    }

    pub fn with_module(mut self, module: Arc<ModuleConfig>) -> Self {
        self.module = Some(module);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<MonitorConfig>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_provider(mut self, provider: Arc<ProviderConfig>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_protocol(mut self, protocol: Arc<ProtocolConfig>) -> Self {
        self.protocols.push(protocol);
        self
    }

    pub fn with_registry(mut self, registry: Arc<RegistryConfig>) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn interface_name(&self) -> RpcResult<&str> {
        required_interface("service", self.interface.as_deref())
    }

    /// Own protocols, else the provider's
    pub fn effective_protocols(&self) -> Vec<Arc<ProtocolConfig>> {
        if !self.protocols.is_empty() {
            return self.protocols.clone();
        }
        self.provider
            .as_ref()
            .map(|p| p.protocols.clone())
            .unwrap_or_default()
    }

    /// Own registries, else the provider's, else the application's
    pub fn effective_registries(&self) -> Vec<Arc<RegistryConfig>> {
        if !self.registries.is_empty() {
            return self.registries.clone();
        }
        if let Some(provider) = self.provider.as_ref().filter(|p| !p.registries.is_empty()) {
            return provider.registries.clone();
        }
        self.application
            .as_ref()
            .map(|a| a.registries.clone())
            .unwrap_or_default()
    }

    pub fn effective_monitor(&self) -> Option<Arc<MonitorConfig>> {
        self.monitor
            .clone()
            .or_else(|| self.application.as_ref().and_then(|a| a.monitor.clone()))
    }

    /// Inheritance chain for one exported protocol, most specific first:
    /// service, protocol, provider, module, application
    pub fn attribute_chain<'a>(
        &'a self,
        protocol: Option<&'a ProtocolConfig>,
    ) -> [Option<&'a dyn AttributeSource>; 5] {
        [
            Some(self as &dyn AttributeSource),
            protocol.map(|p| p as &dyn AttributeSource),
            self.provider.as_deref().map(|p| p as &dyn AttributeSource),
            self.module.as_deref().map(|m| m as &dyn AttributeSource),
            self.application.as_deref().map(|a| a as &dyn AttributeSource),
        ]
    }
}

/// A remote service to refer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReferenceConfig {
    /// Interface identifier; required
    pub interface: Option<String>,
    pub version: Option<String>,
    pub group: Option<String>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub loadbalance: Option<String>,
    pub cluster: Option<String>,
    pub check: Option<bool>,
    pub generic: Option<bool>,
    pub lazy: Option<bool>,
    pub sticky: Option<bool>,
    pub connections: Option<u32>,
    pub filter: Option<String>,
    /// Only use providers exported over this protocol
    pub protocol: Option<String>,

    #[serde(skip)]
    pub application: Option<Arc<ApplicationConfig>>,
    #[serde(skip)]
    pub module: Option<Arc<ModuleConfig>>,
    #[serde(skip)]
    pub monitor: Option<Arc<MonitorConfig>>,
    #[serde(skip)]
    pub consumer: Option<Arc<ConsumerConfig>>,
    #[serde(skip)]
    pub registries: Vec<Arc<RegistryConfig>>,
}

impl_attributes!(
    ReferenceConfig, "reference",
    params {
        version: "version" => "version",
        group: "group" => "group",
        timeout: "timeout" => "timeout",
        retries: "retries" => "retries",
        loadbalance: "loadbalance" => "loadbalance",
        cluster: "cluster" => "cluster",
        check: "check" => "check" [default true],
        generic: "generic" => "generic" [default false],
        lazy: "lazy" => "lazy" [default false],
        sticky: "sticky" => "sticky" [default false],
        connections: "connections" => "connections",
        filter: "filter" => "reference.filter",
        protocol: "protocol" => "protocol",
    }
    local {
        interface: "interface",
    }
);

impl ReferenceConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: Some(interface.into()),
            ..Default::default()
        }
    }

    pub fn with_application(mut self, application: Arc<ApplicationConfig>) -> Self {
        self.application = Some(application);
        self
    }

    pub fn with_module(mut self, module: Arc<ModuleConfig>) -> Self {
        self.module = Some(module);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<MonitorConfig>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_consumer(mut self, consumer: Arc<ConsumerConfig>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn with_registry(mut self, registry: Arc<RegistryConfig>) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn interface_name(&self) -> RpcResult<&str> {
        required_interface("reference", self.interface.as_deref())
    }

    /// Own registries, else the consumer's, else the application's
    pub fn effective_registries(&self) -> Vec<Arc<RegistryConfig>> {
        if !self.registries.is_empty() {
            return self.registries.clone();
        }
        if let Some(consumer) = self.consumer.as_ref().filter(|c| !c.registries.is_empty()) {
            return consumer.registries.clone();
        }
        self.application
            .as_ref()
            .map(|a| a.registries.clone())
            .unwrap_or_default()
    }

    pub fn effective_monitor(&self) -> Option<Arc<MonitorConfig>> {
        self.monitor
            .clone()
            .or_else(|| self.application.as_ref().and_then(|a| a.monitor.clone()))
    }

    /// Inheritance chain, most specific first: reference, consumer, module,
    /// application
    pub fn attribute_chain(&self) -> [Option<&dyn AttributeSource>; 4] {
        [
            Some(self as &dyn AttributeSource),
            self.consumer.as_deref().map(|c| c as &dyn AttributeSource),
            self.module.as_deref().map(|m| m as &dyn AttributeSource),
            self.application.as_deref().map(|a| a as &dyn AttributeSource),
        ]
    }
}

fn required_interface<'a>(tag: &str, interface: Option<&'a str>) -> RpcResult<&'a str> {
    interface
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .ok_or_else(|| RpcError::config(format!("<{}> has no interface", tag)))
}
