//! Application, module and monitor configuration

use serde::Deserialize;
use std::sync::Arc;

use super::endpoint::{endpoint_descriptor, RegistryConfig};
use super::AttributeSource;
use crate::descriptor::Descriptor;
use crate::error::RpcResult;

/// Path monitor descriptors point at
pub const MONITOR_SERVICE_PATH: &str = "MonitorService";

/// Identity of the running application
///
/// Its attributes are the last step of the inheritance cascade, and its
/// registries/monitor apply to every service and reference that does not
/// configure its own.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ApplicationConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub owner: Option<String>,
    pub organization: Option<String>,
    pub environment: Option<String>,

    #[serde(skip)]
    pub registries: Vec<Arc<RegistryConfig>>,

    #[serde(skip)]
    pub monitor: Option<Arc<MonitorConfig>>,
}

impl_attributes!(
    ApplicationConfig, "application",
    params {
        name: "name" => "application",
        version: "version" => "application.version",
        owner: "owner" => "owner",
        organization: "organization" => "organization",
        environment: "environment" => "environment",
    }
);

impl ApplicationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_registry(mut self, registry: Arc<RegistryConfig>) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<MonitorConfig>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

/// Sub-unit of an application
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModuleConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub owner: Option<String>,
    pub organization: Option<String>,
}

impl_attributes!(
    ModuleConfig, "module",
    params {
        name: "name" => "module",
        version: "version" => "module.version",
        owner: "owner" => "module.owner",
        organization: "organization" => "module.organization",
    }
);

impl ModuleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Where invocation statistics are reported
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MonitorConfig {
    /// Monitor scheme; may instead be given as the address prefix
    pub protocol: Option<String>,
    pub address: Option<String>,
    pub interval: Option<u64>,
    pub group: Option<String>,
    pub version: Option<String>,
}

impl_attributes!(
    MonitorConfig, "monitor",
    params {
        interval: "interval" => "interval",
        group: "group" => "group",
        version: "version" => "version",
    }
    local {
        protocol: "protocol",
        address: "address",
    }
);

impl MonitorConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Encode this monitor as a standalone descriptor
    pub fn descriptor(&self) -> RpcResult<Descriptor> {
        let descriptor = endpoint_descriptor(
            "monitor",
            self.protocol.as_deref(),
            self.address.as_deref(),
            MONITOR_SERVICE_PATH,
        )?;
        Ok(descriptor.with_params(self.attributes()))
    }
}
