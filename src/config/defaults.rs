//! Provider and consumer defaults
//!
//! Attributes set here apply to every service (provider) or reference
//! (consumer) that points at the object and leaves the attribute unset.

use serde::Deserialize;
use std::sync::Arc;

use super::endpoint::{ProtocolConfig, RegistryConfig};

/// Defaults shared by exported services
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProviderConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub loadbalance: Option<String>,
    pub cluster: Option<String>,
    pub version: Option<String>,
    pub group: Option<String>,
    pub weight: Option<u32>,
    pub delay: Option<i64>,
    pub token: Option<String>,
    pub accesslog: Option<String>,
    pub filter: Option<String>,
    pub serialization: Option<String>,
    pub threads: Option<u32>,
    pub dynamic: Option<bool>,

    #[serde(skip)]
    pub protocols: Vec<Arc<ProtocolConfig>>,

    #[serde(skip)]
    pub registries: Vec<Arc<RegistryConfig>>,
}

impl_attributes!(
    ProviderConfig, "provider",
    params {
        timeout: "timeout" => "timeout",
        retries: "retries" => "retries",
        loadbalance: "loadbalance" => "loadbalance",
        cluster: "cluster" => "cluster",
        version: "version" => "version",
        group: "group" => "group",
        weight: "weight" => "weight",
        delay: "delay" => "delay",
        token: "token" => "token",
        accesslog: "accesslog" => "accesslog",
        filter: "filter" => "service.filter",
        serialization: "serialization" => "serialization",
        threads: "threads" => "threads",
        dynamic: "dynamic" => "dynamic" [default true],
    }
    local {
        host: "host",
        port: "port",
    }
);

impl ProviderConfig {
    pub fn with_protocol(mut self, protocol: Arc<ProtocolConfig>) -> Self {
        self.protocols.push(protocol);
        self
    }

    pub fn with_registry(mut self, registry: Arc<RegistryConfig>) -> Self {
        self.registries.push(registry);
        self
    }
}

/// Defaults shared by service references
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConsumerConfig {
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub loadbalance: Option<String>,
    pub cluster: Option<String>,
    pub version: Option<String>,
    pub group: Option<String>,
    pub check: Option<bool>,
    pub generic: Option<bool>,
    pub lazy: Option<bool>,
    pub sticky: Option<bool>,
    pub connections: Option<u32>,
    pub filter: Option<String>,

    #[serde(skip)]
    pub registries: Vec<Arc<RegistryConfig>>,
}

impl_attributes!(
    ConsumerConfig, "consumer",
    params {
        timeout: "timeout" => "timeout",
        retries: "retries" => "retries",
        loadbalance: "loadbalance" => "loadbalance",
        cluster: "cluster" => "cluster",
        version: "version" => "version",
        group: "group" => "group",
        check: "check" => "check" [default true],
        generic: "generic" => "generic" [default false],
        lazy: "lazy" => "lazy" [default false],
        sticky: "sticky" => "sticky" [default false],
        connections: "connections" => "connections",
        filter: "filter" => "reference.filter",
    }
);

impl ConsumerConfig {
    pub fn with_registry(mut self, registry: Arc<RegistryConfig>) -> Self {
        self.registries.push(registry);
        self
    }
}
