//! Registry and protocol configuration
//!
//! Both objects name an endpoint: the protocol's `name` becomes the scheme of
//! exported service descriptors, the registry's `name` (or the scheme prefix of
//! its address) becomes the scheme of the registry descriptor.

use serde::Deserialize;

use super::AttributeSource;
use crate::descriptor::Descriptor;
use crate::error::{RpcError, RpcResult};

/// Path registry descriptors point at
pub const REGISTRY_SERVICE_PATH: &str = "RegistryService";

/// Extra addresses of a clustered registry, comma separated
pub const BACKUP_KEY: &str = "backup";

/// A discovery registry services are registered in and references subscribe to
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RegistryConfig {
    pub id: Option<String>,
    /// Registry scheme (`zookeeper`, `memory`, ...)
    pub name: Option<String>,
    /// `host:port[,host:port...]`, optionally prefixed with `scheme://`
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub transporter: Option<String>,
    pub timeout: Option<u64>,
    pub session: Option<u64>,
    pub group: Option<String>,
    pub file: Option<String>,
    pub check: Option<bool>,
    pub register: Option<bool>,
    pub subscribe: Option<bool>,
    pub dynamic: Option<bool>,
}

impl_attributes!(
    RegistryConfig, "registry",
    params {
        username: "username" => "username",
        password: "password" => "password",
        transporter: "transporter" => "transporter",
        timeout: "timeout" => "timeout",
        session: "session" => "session",
        group: "group" => "group",
        file: "file" => "file",
        check: "check" => "check" [default true],
        register: "register" => "register" [default true],
        subscribe: "subscribe" => "subscribe" [default true],
        dynamic: "dynamic" => "dynamic" [default true],
    }
    local {
        id: "id",
        name: "name",
        address: "address",
    }
);

impl RegistryConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Whether services should be registered here (`register = false` makes
    /// the registry subscribe-only)
    pub fn registers(&self) -> bool {
        self.register.unwrap_or(true)
    }

    /// Encode this registry as a standalone descriptor
    pub fn descriptor(&self) -> RpcResult<Descriptor> {
        let descriptor = endpoint_descriptor(
            "registry",
            self.name.as_deref(),
            self.address.as_deref(),
            REGISTRY_SERVICE_PATH,
        )?;
        Ok(descriptor.with_params(self.attributes()))
    }
}

/// A transport services are exported over
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProtocolConfig {
    pub id: Option<String>,
    /// Protocol scheme (`dubbo`, `injvm`, ...)
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub threads: Option<u32>,
    pub iothreads: Option<u32>,
    pub serialization: Option<String>,
    pub server: Option<String>,
    pub client: Option<String>,
    pub codec: Option<String>,
    pub charset: Option<String>,
    pub payload: Option<u64>,
    pub heartbeat: Option<u64>,
    pub dispatcher: Option<String>,
    pub accesslog: Option<String>,
    pub contextpath: Option<String>,
}

impl_attributes!(
    ProtocolConfig, "protocol",
    params {
        threads: "threads" => "threads",
        iothreads: "iothreads" => "iothreads",
        serialization: "serialization" => "serialization",
        server: "server" => "server",
        client: "client" => "client",
        codec: "codec" => "codec",
        charset: "charset" => "charset",
        payload: "payload" => "payload",
        heartbeat: "heartbeat" => "heartbeat",
        dispatcher: "dispatcher" => "dispatcher",
        accesslog: "accesslog" => "accesslog",
        contextpath: "contextpath" => "contextpath",
    }
    local {
        id: "id",
        name: "name",
        host: "host",
        port: "port",
    }
);

impl ProtocolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Scheme of descriptors exported over this protocol
    pub fn scheme(&self) -> RpcResult<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| RpcError::config("<protocol> has no name"))
    }
}

/// Build `scheme://host:port/path` from a name and a (possibly prefixed,
/// possibly clustered) address
pub(crate) fn endpoint_descriptor(
    kind: &str,
    name: Option<&str>,
    address: Option<&str>,
    default_path: &str,
) -> RpcResult<Descriptor> {
    let address = address
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| RpcError::config(format!("<{}> has no address", kind)))?;

    let (address_scheme, rest) = match address.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, address),
    };

    let scheme = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or(address_scheme)
        .ok_or_else(|| {
            RpcError::config(format!(
                "<{}> at '{}' has neither a name nor a scheme prefix",
                kind, address
            ))
        })?;

    let split_at = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(split_at);
    let mut hosts = authority.split(',').map(str::trim).filter(|h| !h.is_empty());
    let primary = hosts
        .next()
        .ok_or_else(|| RpcError::config(format!("<{}> address '{}' has no host", kind, address)))?;
    let backups: Vec<&str> = hosts.collect();

    let mut descriptor = Descriptor::parse(&format!("{}://{}{}", scheme, primary, tail))
        .map_err(|e| RpcError::config(format!("<{}> address '{}' is invalid: {}", kind, address, e)))?;
    if descriptor.path().is_empty() {
        descriptor = descriptor.with_path(default_path);
    }
    if !backups.is_empty() {
        descriptor = descriptor.with_param(BACKUP_KEY, backups.join(","));
    }
    Ok(descriptor)
}
