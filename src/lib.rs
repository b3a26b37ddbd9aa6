/*!
 * orbit-rpc - descriptor model and pluggable export/refer runtime
 *
 * - Descriptor: scheme://host:port/path?params, the value every component exchanges
 * - Configuration model with attribute inheritance and a fixed tag table
 * - Encoder from configuration chains to per-pair descriptors
 * - Extension registry: capability + scheme -> cached implementation
 * - Orchestrator: export/unexport of services, subscribe/invoke/destroy of references
 */

pub mod config;
pub mod descriptor;
pub mod encoder;
pub mod error;
pub mod extension;
pub mod logging;
pub mod orchestrator;
pub mod settings;

// Re-export commonly used types
pub use descriptor::Descriptor;
pub use encoder::{encode_reference, encode_service};
pub use error::{ErrorCategory, RpcError, RpcResult};
pub use extension::{global_registry, ExtensionRegistry};
pub use orchestrator::{ReferenceHandle, ReferenceState, RpcContext, ServiceExporter};
pub use settings::{LogLevel, RuntimeSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
