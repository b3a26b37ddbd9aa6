/*!
 * Extension registry tests: adaptive resolution and third-party capabilities
 */

use std::sync::Arc;

use orbit_rpc::extension::{
    Capability, InjvmProtocol, LoadBalanceCapability, Protocol, ProtocolCapability, RegistryCapability,
};
use orbit_rpc::{Descriptor, ExtensionRegistry, RpcError, RpcResult};

/// A capability defined outside the crate
trait Codec: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u8>;
}

struct CodecCapability;

impl Capability for CodecCapability {
    const NAME: &'static str = "codec";
    type Instance = dyn Codec;
}

struct Utf8Codec;

impl Codec for Utf8Codec {
    fn encode(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }
}

struct ReversedCodec;

impl Codec for ReversedCodec {
    fn encode(&self, text: &str) -> Vec<u8> {
        text.bytes().rev().collect()
    }
}

#[test]
fn test_custom_capability() {
    let registry = ExtensionRegistry::empty();
    registry.register::<CodecCapability, _>("utf8", || Ok(Arc::new(Utf8Codec) as Arc<dyn Codec>));
    registry.register::<CodecCapability, _>("reversed", || Ok(Arc::new(ReversedCodec) as Arc<dyn Codec>));

    let utf8 = registry.resolve::<CodecCapability>("utf8").unwrap();
    let reversed = registry.resolve::<CodecCapability>("reversed").unwrap();
    assert_eq!(utf8.encode("ab"), b"ab".to_vec());
    assert_eq!(reversed.encode("ab"), b"ba".to_vec());
    assert_eq!(registry.schemes::<CodecCapability>(), vec!["reversed", "utf8"]);
}

#[test]
fn test_selection_follows_descriptor_scheme() {
    let registry = ExtensionRegistry::empty();
    registry.register::<CodecCapability, _>("utf8", || Ok(Arc::new(Utf8Codec) as Arc<dyn Codec>));
    registry.register::<CodecCapability, _>("reversed", || Ok(Arc::new(ReversedCodec) as Arc<dyn Codec>));

    let forward = Descriptor::parse("utf8://10.0.0.1:20880/demo.DemoService").unwrap();
    let backward = forward.clone().with_scheme("reversed").unwrap();

    let encode = |d: &Descriptor| -> RpcResult<Vec<u8>> {
        Ok(registry.resolve_for::<CodecCapability>(d)?.encode("xy"))
    };
    assert_eq!(encode(&forward).unwrap(), b"xy".to_vec());
    assert_eq!(encode(&backward).unwrap(), b"yx".to_vec());
}

#[test]
fn test_repeated_resolve_is_identical() {
    let registry = ExtensionRegistry::with_builtins();
    let a = registry.resolve::<ProtocolCapability>("injvm").unwrap();
    let b = registry.resolve::<ProtocolCapability>("injvm").unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let c = registry.resolve::<RegistryCapability>("memory").unwrap();
    let d = registry.resolve::<RegistryCapability>("memory").unwrap();
    assert!(Arc::ptr_eq(&c, &d));
}

#[test]
fn test_unregistered_scheme_never_falls_back() {
    let registry = ExtensionRegistry::with_builtins();
    for scheme in ["dubbo", "", "rest"] {
        match registry.resolve::<ProtocolCapability>(scheme) {
            Err(RpcError::ExtensionNotFound { capability, .. }) => assert_eq!(capability, "protocol"),
            Err(other) => panic!("Expected ExtensionNotFound, got {:?}", other),
            Ok(_) => panic!("scheme '{}' should not resolve", scheme),
        }
    }
    assert!(registry.resolve::<LoadBalanceCapability>("leastactive").is_err());
}

#[test]
fn test_separate_registries_are_isolated() {
    let a = ExtensionRegistry::with_builtins();
    let b = ExtensionRegistry::with_builtins();
    let from_a = a.resolve::<ProtocolCapability>("injvm").unwrap();
    let from_b = b.resolve::<ProtocolCapability>("injvm").unwrap();
    assert!(!Arc::ptr_eq(&from_a, &from_b));

    a.register_instance::<ProtocolCapability>("dubbo", Arc::new(InjvmProtocol::new()) as Arc<dyn Protocol>);
    assert!(a.is_registered::<ProtocolCapability>("dubbo"));
    assert!(!b.is_registered::<ProtocolCapability>("dubbo"));
}
