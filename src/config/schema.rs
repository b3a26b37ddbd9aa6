//! Tag table for the declarative configuration namespace
//!
//! The external document parser hands over one tag name and a flat map of
//! attributes per element; [`build_element`] turns that into the matching
//! configuration object. The mapping is a fixed table: nothing is discovered
//! at runtime.

use serde::Deserialize;
use tracing::debug;

use super::application::{ApplicationConfig, ModuleConfig, MonitorConfig};
use super::defaults::{ConsumerConfig, ProviderConfig};
use super::endpoint::{ProtocolConfig, RegistryConfig};
use super::service::{ReferenceConfig, ServiceConfig};
use super::AttributeSource;
use crate::error::{RpcError, RpcResult};

/// Request to scan a package for annotated services; handled outside this crate
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AnnotationScan {
    pub package: Option<String>,
}

impl_attributes!(
    AnnotationScan, "annotation",
    params {}
    local {
        package: "package",
    }
);

/// One configuration object produced from one tag
#[derive(Debug, Clone)]
pub enum ConfigElement {
    Application(ApplicationConfig),
    Module(ModuleConfig),
    Registry(RegistryConfig),
    Monitor(MonitorConfig),
    Provider(ProviderConfig),
    Consumer(ConsumerConfig),
    Protocol(ProtocolConfig),
    Service(ServiceConfig),
    Reference(ReferenceConfig),
    Annotation(AnnotationScan),
}

impl ConfigElement {
    pub fn tag(&self) -> &'static str {
        self.as_source().tag()
    }

    pub fn as_source(&self) -> &dyn AttributeSource {
        match self {
            ConfigElement::Application(c) => c,
            ConfigElement::Module(c) => c,
            ConfigElement::Registry(c) => c,
            ConfigElement::Monitor(c) => c,
            ConfigElement::Provider(c) => c,
            ConfigElement::Consumer(c) => c,
            ConfigElement::Protocol(c) => c,
            ConfigElement::Service(c) => c,
            ConfigElement::Reference(c) => c,
            ConfigElement::Annotation(c) => c,
        }
    }

    fn as_source_mut(&mut self) -> &mut dyn AttributeSource {
        match self {
            ConfigElement::Application(c) => c,
            ConfigElement::Module(c) => c,
            ConfigElement::Registry(c) => c,
            ConfigElement::Monitor(c) => c,
            ConfigElement::Provider(c) => c,
            ConfigElement::Consumer(c) => c,
            ConfigElement::Protocol(c) => c,
            ConfigElement::Service(c) => c,
            ConfigElement::Reference(c) => c,
            ConfigElement::Annotation(c) => c,
        }
    }
}

/// Tag name and the constructor of its empty configuration object
pub struct TagBinding {
    pub tag: &'static str,
    construct: fn() -> ConfigElement,
}

fn application() -> ConfigElement {
    ConfigElement::Application(ApplicationConfig::default())
}

fn module() -> ConfigElement {
    ConfigElement::Module(ModuleConfig::default())
}

fn registry() -> ConfigElement {
    ConfigElement::Registry(RegistryConfig::default())
}

fn monitor() -> ConfigElement {
    ConfigElement::Monitor(MonitorConfig::default())
}

fn provider() -> ConfigElement {
    ConfigElement::Provider(ProviderConfig::default())
}

fn consumer() -> ConfigElement {
    ConfigElement::Consumer(ConsumerConfig::default())
}

fn protocol() -> ConfigElement {
    ConfigElement::Protocol(ProtocolConfig::default())
}

fn service() -> ConfigElement {
    ConfigElement::Service(ServiceConfig::default())
}

fn reference() -> ConfigElement {
    ConfigElement::Reference(ReferenceConfig::default())
}

fn annotation() -> ConfigElement {
    ConfigElement::Annotation(AnnotationScan::default())
}

/// Every recognized tag
pub static TAGS: &[TagBinding] = &[
    TagBinding { tag: "application", construct: application },
    TagBinding { tag: "module", construct: module },
    TagBinding { tag: "registry", construct: registry },
    TagBinding { tag: "monitor", construct: monitor },
    TagBinding { tag: "provider", construct: provider },
    TagBinding { tag: "consumer", construct: consumer },
    TagBinding { tag: "protocol", construct: protocol },
    TagBinding { tag: "service", construct: service },
    TagBinding { tag: "reference", construct: reference },
    TagBinding { tag: "annotation", construct: annotation },
];

/// Build the configuration object for `tag` from its attributes
pub fn build_element<K, V, I>(tag: &str, attributes: I) -> RpcResult<ConfigElement>
where
    K: AsRef<str>,
    V: AsRef<str>,
    I: IntoIterator<Item = (K, V)>,
{
    let binding = TAGS
        .iter()
        .find(|b| b.tag == tag)
        .ok_or_else(|| RpcError::config(format!("unknown configuration tag <{}>", tag)))?;

    let mut element = (binding.construct)();
    for (name, value) in attributes {
        element
            .as_source_mut()
            .set_attribute(name.as_ref(), value.as_ref())?;
    }

    debug!(tag = binding.tag, "built configuration element");
    Ok(element)
}
