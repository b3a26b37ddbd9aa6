//! Descriptor encoder
//!
//! Turns a populated configuration chain into descriptors:
//!
//! - a service yields one descriptor per protocol × registry pair, scheme from
//!   the protocol, authority from the local binding, and the registry embedded
//!   as the `registry` parameter;
//! - a reference yields one `consumer://` descriptor per registry, authority
//!   left empty until discovery fills in providers.
//!
//! Attributes of every object in the chain are resolved key by key and
//! flattened into parameters. More specific objects win:
//! application < module < provider/consumer < protocol < service/reference.
//! A key whose winning value is its declared default is left out.

use once_cell::sync::Lazy;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{debug, trace};

use crate::config::{resolve_attributes, AttributeSource, ReferenceConfig, ServiceConfig};
use crate::config::{ApplicationConfig, MonitorConfig, RegistryConfig};
use crate::descriptor::{Descriptor, INTERFACE_KEY, MONITOR_KEY, REGISTRY_KEY, SIDE_KEY};
use crate::error::{RpcError, RpcResult};
use crate::settings::RuntimeSettings;

pub const PROVIDER_SIDE: &str = "provider";
pub const CONSUMER_SIDE: &str = "consumer";

/// Scheme of reference descriptors
pub const CONSUMER_SCHEME: &str = "consumer";

static LOCAL_HOST: Lazy<String> = Lazy::new(detect_local_host);

/// Address of the interface outbound traffic leaves from, or loopback
pub fn local_host() -> &'static str {
    &LOCAL_HOST
}

fn detect_local_host() -> String {
    // Connecting a UDP socket sends nothing; it only selects a route.
    let detected = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified());

    match detected {
        Some(ip) => ip.to_string(),
        None => IpAddr::V4(Ipv4Addr::LOCALHOST).to_string(),
    }
}

/// Encode a service export into one descriptor per protocol × registry pair
pub fn encode_service(service: &ServiceConfig, settings: &RuntimeSettings) -> RpcResult<Vec<Descriptor>> {
    let interface = service.interface_name()?;

    let protocols = service.effective_protocols();
    if protocols.is_empty() {
        return Err(RpcError::config(format!("service '{}' has no protocol", interface)));
    }

    let registries = service.effective_registries();
    if registries.is_empty() {
        return Err(RpcError::config(format!("service '{}' has no registry", interface)));
    }

    let application = service.application.as_deref();
    let registry_descriptors = registry_descriptors(&registries, application)?;
    let monitor = encode_monitor(service.effective_monitor().as_deref())?;
    let path = service.path.as_deref().unwrap_or(interface);
    let provider = service.provider.as_deref();

    let mut descriptors = Vec::with_capacity(protocols.len() * registry_descriptors.len());
    for protocol in &protocols {
        let scheme = protocol.scheme()?;
        let host = protocol
            .host
            .as_deref()
            .or_else(|| provider.and_then(|p| p.host.as_deref()))
            .or(settings.host.as_deref())
            .unwrap_or_else(|| local_host());
        let port = protocol
            .port
            .or_else(|| provider.and_then(|p| p.port))
            .unwrap_or(0);

        let mut base = Descriptor::new(scheme, host, port, path)?
            .with_params(resolve_attributes(&service.attribute_chain(Some(&**protocol))))
            .with_param(SIDE_KEY, PROVIDER_SIDE)
            .with_param(INTERFACE_KEY, interface);
        if let Some(monitor) = &monitor {
            base = base.with_param(MONITOR_KEY, monitor.to_string());
        }

        for registry in &registry_descriptors {
            let descriptor = base.clone().with_param(REGISTRY_KEY, registry.to_string());
            trace!(descriptor = %descriptor, "encoded export descriptor");
            descriptors.push(descriptor);
        }
    }

    debug!(
        interface,
        protocols = protocols.len(),
        registries = registry_descriptors.len(),
        "encoded service"
    );
    Ok(descriptors)
}

/// Encode a reference into one consumer descriptor per registry
pub fn encode_reference(reference: &ReferenceConfig) -> RpcResult<Vec<Descriptor>> {
    let interface = reference.interface_name()?;

    let registries = reference.effective_registries();
    if registries.is_empty() {
        return Err(RpcError::config(format!("reference '{}' has no registry", interface)));
    }

    let application = reference.application.as_deref();
    let registry_descriptors = registry_descriptors(&registries, application)?;
    let monitor = encode_monitor(reference.effective_monitor().as_deref())?;

    let mut base = Descriptor::new(CONSUMER_SCHEME, "", 0, interface)?
        .with_params(resolve_attributes(&reference.attribute_chain()))
        .with_param(SIDE_KEY, CONSUMER_SIDE)
        .with_param(INTERFACE_KEY, interface);
    if let Some(monitor) = &monitor {
        base = base.with_param(MONITOR_KEY, monitor.to_string());
    }

    let descriptors: Vec<Descriptor> = registry_descriptors
        .iter()
        .map(|registry| base.clone().with_param(REGISTRY_KEY, registry.to_string()))
        .collect();

    debug!(interface, registries = descriptors.len(), "encoded reference");
    Ok(descriptors)
}

fn flatten(descriptor: Descriptor, source: Option<&dyn AttributeSource>) -> Descriptor {
    match source {
        Some(source) => descriptor.with_params(source.attributes()),
        None => descriptor,
    }
}

fn registry_descriptors(
    registries: &[std::sync::Arc<RegistryConfig>],
    application: Option<&ApplicationConfig>,
) -> RpcResult<Vec<Descriptor>> {
    registries
        .iter()
        .map(|registry| {
            let descriptor = registry.descriptor()?;
            Ok(flatten(descriptor, application.map(|a| a as &dyn AttributeSource)))
        })
        .collect()
}

fn encode_monitor(monitor: Option<&MonitorConfig>) -> RpcResult<Option<Descriptor>> {
    monitor.map(MonitorConfig::descriptor).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ConsumerConfig, ModuleConfig, ProtocolConfig, ProviderConfig, RegistryConfig,
    };
    use std::sync::Arc;

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            host: Some("10.0.0.5".to_string()),
            ..Default::default()
        }
    }

    fn demo_service() -> ServiceConfig {
        ServiceConfig::new("demo.DemoService")
            .with_application(Arc::new(ApplicationConfig::new("demo-app")))
            .with_protocol(Arc::new(ProtocolConfig::new("dubbo").with_port(20880)))
            .with_registry(Arc::new(RegistryConfig::new("zookeeper", "localhost:2181")))
    }

    #[test]
    fn test_single_pair_scenario() {
        let descriptors = encode_service(&demo_service(), &settings()).unwrap();
        assert_eq!(descriptors.len(), 1);

        let d = &descriptors[0];
        assert_eq!(d.scheme(), "dubbo");
        assert_eq!(d.host(), "10.0.0.5");
        assert_eq!(d.port(), 20880);
        assert_eq!(d.path(), "demo.DemoService");
        assert_eq!(d.param("application"), Some("demo-app"));
        assert_eq!(d.param("side"), Some("provider"));

        let registry = d.registry().unwrap().unwrap();
        assert_eq!(registry.scheme(), "zookeeper");
        assert_eq!(registry.address(), "localhost:2181");
        assert_eq!(registry.param("application"), Some("demo-app"));
    }

    #[test]
    fn test_cartesian_product() {
        let service = demo_service()
            .with_protocol(Arc::new(ProtocolConfig::new("rest").with_port(8080)))
            .with_protocol(Arc::new(ProtocolConfig::new("grpc").with_port(50051)))
            .with_registry(Arc::new(RegistryConfig::new("nacos", "nacos:8848")));

        let descriptors = encode_service(&service, &settings()).unwrap();
        assert_eq!(descriptors.len(), 3 * 2);

        let mut pairs: Vec<(String, String)> = descriptors
            .iter()
            .map(|d| (d.scheme().to_string(), d.registry().unwrap().unwrap().scheme().to_string()))
            .collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), 6);
    }

    #[test]
    fn test_precedence() {
        let provider = ProviderConfig {
            timeout: Some(3000),
            retries: Some(4),
            threads: Some(50),
            ..Default::default()
        };
        let protocol = ProtocolConfig {
            threads: Some(200),
            ..ProtocolConfig::new("dubbo").with_port(20880)
        };
        let service = ServiceConfig {
            timeout: Some(500),
            ..ServiceConfig::new("demo.DemoService")
        }
        .with_provider(Arc::new(provider))
        .with_protocol(Arc::new(protocol))
        .with_registry(Arc::new(RegistryConfig::new("zookeeper", "localhost:2181")))
        .with_module(Arc::new(ModuleConfig::new("billing")));

        let d = &encode_service(&service, &settings()).unwrap()[0];
        assert_eq!(d.param("timeout"), Some("500"));
        assert_eq!(d.param("retries"), Some("4"));
        assert_eq!(d.param("threads"), Some("200"));
        assert_eq!(d.param("module"), Some("billing"));
    }

    #[test]
    fn test_explicit_default_on_service_wins() {
        let provider = ProviderConfig {
            dynamic: Some(false),
            ..Default::default()
        };
        let service = ServiceConfig {
            dynamic: Some(true),
            ..demo_service()
        }
        .with_provider(Arc::new(provider));

        let d = &encode_service(&service, &settings()).unwrap()[0];
        assert_eq!(d.param("dynamic"), None);

        let inheriting = demo_service().with_provider(Arc::new(ProviderConfig {
            dynamic: Some(false),
            ..Default::default()
        }));
        let d = &encode_service(&inheriting, &settings()).unwrap()[0];
        assert_eq!(d.param("dynamic"), Some("false"));
    }

    #[test]
    fn test_explicit_default_on_reference_wins() {
        let consumer = ConsumerConfig {
            check: Some(false),
            ..Default::default()
        };
        let reference = ReferenceConfig {
            check: Some(true),
            ..ReferenceConfig::new("demo.DemoService")
        }
        .with_consumer(Arc::new(consumer))
        .with_registry(Arc::new(RegistryConfig::new("zookeeper", "zk1:2181")));

        let d = &encode_reference(&reference).unwrap()[0];
        assert_eq!(d.param("check"), None);
    }

    #[test]
    fn test_module_overrides_application_on_reference() {
        let reference = ReferenceConfig::new("demo.DemoService")
            .with_application(Arc::new(ApplicationConfig::new("demo-app")))
            .with_module(Arc::new(ModuleConfig::new("billing")))
            .with_registry(Arc::new(RegistryConfig::new("zookeeper", "zk1:2181")));

        let d = &encode_reference(&reference).unwrap()[0];
        assert_eq!(d.param("application"), Some("demo-app"));
        assert_eq!(d.param("module"), Some("billing"));
    }

    #[test]
    fn test_host_and_port_fallbacks() {
        let provider = ProviderConfig {
            host: Some("192.168.1.20".to_string()),
            port: Some(20990),
            ..Default::default()
        }
        .with_protocol(Arc::new(ProtocolConfig::new("dubbo")));
        let service = ServiceConfig::new("demo.DemoService")
            .with_provider(Arc::new(provider))
            .with_registry(Arc::new(RegistryConfig::new("zookeeper", "localhost:2181")));

        let d = &encode_service(&service, &settings()).unwrap()[0];
        assert_eq!(d.host(), "192.168.1.20");
        assert_eq!(d.port(), 20990);

        let unbound = ServiceConfig::new("demo.DemoService")
            .with_protocol(Arc::new(ProtocolConfig::new("dubbo")))
            .with_registry(Arc::new(RegistryConfig::new("zookeeper", "localhost:2181")));
        let d = &encode_service(&unbound, &RuntimeSettings::default()).unwrap()[0];
        assert_eq!(d.host(), local_host());
        assert_eq!(d.port(), 0);
    }

    #[test]
    fn test_custom_path() {
        let service = ServiceConfig {
            path: Some("demo".to_string()),
            ..demo_service()
        };
        let d = &encode_service(&service, &settings()).unwrap()[0];
        assert_eq!(d.path(), "demo");
        assert_eq!(d.interface(), "demo.DemoService");
    }

    #[test]
    fn test_missing_pieces_are_config_errors() {
        let no_protocol = ServiceConfig::new("demo.DemoService")
            .with_registry(Arc::new(RegistryConfig::new("zookeeper", "localhost:2181")));
        assert!(matches!(encode_service(&no_protocol, &settings()), Err(RpcError::Config(_))));

        let no_registry = ServiceConfig::new("demo.DemoService")
            .with_protocol(Arc::new(ProtocolConfig::new("dubbo")));
        assert!(matches!(encode_service(&no_registry, &settings()), Err(RpcError::Config(_))));

        let no_interface = ServiceConfig {
            interface: None,
            ..demo_service()
        };
        assert!(matches!(encode_service(&no_interface, &settings()), Err(RpcError::Config(_))));

        let unnamed_protocol = ServiceConfig::new("demo.DemoService")
            .with_protocol(Arc::new(ProtocolConfig::default()))
            .with_registry(Arc::new(RegistryConfig::new("zookeeper", "localhost:2181")));
        assert!(matches!(encode_service(&unnamed_protocol, &settings()), Err(RpcError::Config(_))));
    }

    #[test]
    fn test_encode_reference() {
        let consumer = ConsumerConfig {
            timeout: Some(1200),
            check: Some(false),
            ..Default::default()
        };
        let reference = ReferenceConfig {
            loadbalance: Some("roundrobin".to_string()),
            ..ReferenceConfig::new("demo.DemoService")
        }
        .with_consumer(Arc::new(consumer))
        .with_registry(Arc::new(RegistryConfig::new("zookeeper", "zk1:2181")))
        .with_registry(Arc::new(RegistryConfig::new("memory", "local:1")));

        let descriptors = encode_reference(&reference).unwrap();
        assert_eq!(descriptors.len(), 2);

        let d = &descriptors[0];
        assert_eq!(d.scheme(), CONSUMER_SCHEME);
        assert_eq!(d.host(), "");
        assert_eq!(d.port(), 0);
        assert_eq!(d.param("timeout"), Some("1200"));
        assert_eq!(d.param("check"), Some("false"));
        assert_eq!(d.param("loadbalance"), Some("roundrobin"));
        assert_eq!(d.param("side"), Some("consumer"));
        assert_eq!(descriptors[1].registry().unwrap().unwrap().scheme(), "memory");
    }

    #[test]
    fn test_reference_without_registry() {
        let reference = ReferenceConfig::new("demo.DemoService");
        assert!(matches!(encode_reference(&reference), Err(RpcError::Config(_))));
    }

    #[test]
    fn test_monitor_embedded() {
        let service = demo_service().with_monitor(Arc::new(MonitorConfig::new("dubbo://10.0.0.9:7070")));
        let d = &encode_service(&service, &settings()).unwrap()[0];
        let monitor = Descriptor::parse(d.param(MONITOR_KEY).unwrap()).unwrap();
        assert_eq!(monitor.address(), "10.0.0.9:7070");
    }
}
