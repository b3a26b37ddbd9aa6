//! Configuration model
//!
//! Typed configuration objects, one per tag of the declarative configuration
//! document. Each object is a flat set of optional scalar attributes plus
//! references to other objects (a service points at its protocols,
//! registries and provider defaults; a reference at its registries and
//! consumer defaults).
//!
//! Objects are built once at startup, wrapped in `Arc` and never mutated
//! afterwards. Unset attributes on a service inherit from its protocol, the
//! provider, the module and then the application (a reference: consumer,
//! module, application). The lookup is an explicit ordered walk over that
//! chain (see [`inherited`] and [`resolve_attributes`]).

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{RpcError, RpcResult};

/// Uniform access to the scalar attributes of a configuration object
pub trait AttributeSource {
    /// Tag the object is declared with in the configuration document
    fn tag(&self) -> &'static str;

    /// Every set attribute keyed by its declared parameter name
    ///
    /// Attributes that describe the endpoint itself (protocol name, host,
    /// port, registry address) are not included; the encoder places those in
    /// the descriptor's scheme and authority instead.
    fn explicit_attributes(&self) -> Vec<(&'static str, String)>;

    /// Declared default of a parameter, if it has one
    fn default_value(&self, key: &str) -> Option<String>;

    /// Assign an attribute by its document name, parsing the value
    fn set_attribute(&mut self, name: &str, value: &str) -> RpcResult<()>;

    /// Set attributes that differ from their declared default
    fn attributes(&self) -> Vec<(&'static str, String)> {
        self.explicit_attributes()
            .into_iter()
            .filter(|(key, value)| self.default_value(key).as_deref() != Some(value.as_str()))
            .collect()
    }

    /// Look up one set attribute by its declared parameter name
    fn attribute(&self, key: &str) -> Option<String> {
        self.explicit_attributes()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Chain of attribute sources, most specific object first
pub type AttributeChain<'a> = [Option<&'a dyn AttributeSource>];

/// First value for `key` along `chain`, most specific object first
pub fn inherited(key: &str, chain: &AttributeChain<'_>) -> Option<String> {
    chain.iter().flatten().find_map(|source| source.attribute(key))
}

/// Resolve every attribute along `chain`, most specific object first.
///
/// Each key takes the value of the most specific object that sets it. The key
/// is dropped when that winning value equals the winner's declared default,
/// so an explicit default still hides a parent's non-default value. Keys come
/// out in least-specific-first order of first appearance.
pub fn resolve_attributes(chain: &AttributeChain<'_>) -> Vec<(&'static str, String)> {
    let mut resolved: Vec<(&'static str, String, &dyn AttributeSource)> = Vec::new();
    for source in chain.iter().rev().flatten() {
        for (key, value) in source.explicit_attributes() {
            match resolved.iter().position(|(k, _, _)| *k == key) {
                Some(index) => resolved[index] = (key, value, *source),
                None => resolved.push((key, value, *source)),
            }
        }
    }

    resolved
        .into_iter()
        .filter(|(key, value, source)| source.default_value(key).as_deref() != Some(value.as_str()))
        .map(|(key, value, _)| (key, value))
        .collect()
}

pub(crate) fn parse_attribute<T>(tag: &str, name: &str, value: &str) -> RpcResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse::<T>().map_err(|e| {
        RpcError::config(format!(
            "invalid value '{}' for attribute '{}' on <{}>: {}",
            value, name, tag, e
        ))
    })
}

/// Implement [`AttributeSource`] for a struct of `Option<_>` fields.
///
/// `params` entries are flattened into descriptors under the given key, with
/// an optional `[default ...]` reported by `default_value`; `local` entries
/// are settable from the document but never flattened.
macro_rules! impl_attributes {
    (
        $ty:ty, $tag:literal,
        params { $( $field:ident : $attr:literal => $key:literal $([default $default:expr])? ),* $(,)? }
        $(local { $( $lfield:ident : $lattr:literal ),* $(,)? })?
    ) => {
        impl $crate::config::AttributeSource for $ty {
            fn tag(&self) -> &'static str {
                $tag
            }

            fn explicit_attributes(&self) -> Vec<(&'static str, String)> {
                #[allow(unused_mut)]
                let mut out = Vec::new();
                $(
                    if let Some(value) = &self.$field {
                        out.push(($key, value.to_string()));
                    }
                )*
                out
            }

            fn default_value(&self, key: &str) -> Option<String> {
                match key {
                    $( $key => { $( return Some($default.to_string()); )? } )*
                    _ => {}
                }
                None
            }

            fn set_attribute(&mut self, name: &str, value: &str) -> $crate::error::RpcResult<()> {
                match name {
                    $( $attr => {
                        self.$field = Some($crate::config::parse_attribute($tag, $attr, value)?);
                    } )*
                    $($( $lattr => {
                        self.$lfield = Some($crate::config::parse_attribute($tag, $lattr, value)?);
                    } )*)?
                    other => {
                        return Err($crate::error::RpcError::Config(format!(
                            "unknown attribute '{}' on <{}>",
                            other, $tag
                        )));
                    }
                }
                Ok(())
            }
        }
    };
}

pub mod application;
pub mod defaults;
pub mod endpoint;
pub mod schema;
pub mod service;

pub use application::{ApplicationConfig, ModuleConfig, MonitorConfig};
pub use defaults::{ConsumerConfig, ProviderConfig};
pub use endpoint::{ProtocolConfig, RegistryConfig};
pub use schema::{build_element, AnnotationScan, ConfigElement, TAGS};
pub use service::{ReferenceConfig, ServiceConfig};
