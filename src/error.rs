/*!
 * Error types for orbit-rpc
 */

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub type RpcResult<T> = std::result::Result<T, RpcError>;

#[derive(Error, Debug)]
pub enum RpcError {
    /// Missing or contradictory attributes, or an unresolved dependency chain
    #[error("Configuration error: {0}")]
    Config(String),

    /// No factory registered for the capability/scheme pair
    #[error("No extension registered for capability '{capability}' with scheme '{scheme}'")]
    ExtensionNotFound { capability: String, scheme: String },

    /// Bind, register or subscribe exceeded its bound
    #[error("Operation '{operation}' timed out after {duration_ms} ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// One protocol/registry combination of several failed; the rest were rolled back
    #[error("Export of '{service}' failed after {succeeded} of {total} combinations: {source}")]
    PartialExport {
        service: String,
        succeeded: usize,
        total: usize,
        #[source]
        source: Box<RpcError>,
    },

    /// The provider snapshot of a reference is empty (or every provider was tried)
    #[error("No available provider for '{service}'")]
    NoAvailableProvider { service: String },

    /// Descriptor text could not be parsed or violates an invariant
    #[error("Invalid descriptor '{input}': {reason}")]
    InvalidDescriptor { input: String, reason: String },

    /// Export called on a service that is already exported
    #[error("Service '{0}' is already exported")]
    AlreadyExported(String),

    /// Reference invoked while not subscribed (never subscribed, or destroyed)
    #[error("Reference '{0}' is not subscribed")]
    NotSubscribed(String),

    /// Registry client failure
    #[error("Registry error on {registry}: {message}")]
    Registry { registry: String, message: String },

    /// Transport-level failure reported by a protocol extension
    #[error("Transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The provider handled the call and returned a failure
    #[error("Remote invocation of '{method}' failed: {message}")]
    Remote { method: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RpcError {
    /// Configuration error; extension implementations use this too
    pub fn config(msg: impl Into<String>) -> Self {
        RpcError::Config(msg.into())
    }

    /// Timeout of `operation` after `bound`
    pub fn timeout(operation: impl Into<String>, bound: Duration) -> Self {
        RpcError::Timeout {
            operation: operation.into(),
            duration_ms: bound.as_millis() as u64,
        }
    }

    pub(crate) fn invalid_descriptor(input: &str, reason: impl Into<String>) -> Self {
        RpcError::InvalidDescriptor {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if the whole export/refer (or call) is worth retrying
    pub fn is_retriable(&self) -> bool {
        match self {
            RpcError::Timeout { .. } => true,
            RpcError::Transport { .. } => true,
            RpcError::Registry { .. } => true,
            RpcError::PartialExport { source, .. } => source.is_retriable(),
            RpcError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::Interrupted
            ),

            RpcError::Config(_) => false,
            RpcError::ExtensionNotFound { .. } => false,
            RpcError::NoAvailableProvider { .. } => false,
            RpcError::InvalidDescriptor { .. } => false,
            RpcError::AlreadyExported(_) => false,
            RpcError::NotSubscribed(_) => false,
            RpcError::Remote { .. } => false,
        }
    }

    /// Check if this error means the scheme has no registered implementation
    pub fn is_extension_not_found(&self) -> bool {
        matches!(self, RpcError::ExtensionNotFound { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            RpcError::Config(_) | RpcError::InvalidDescriptor { .. } => ErrorCategory::Configuration,
            RpcError::ExtensionNotFound { .. } => ErrorCategory::Extension,
            RpcError::Timeout { .. } => ErrorCategory::Timeout,
            RpcError::PartialExport { .. } | RpcError::AlreadyExported(_) => ErrorCategory::Lifecycle,
            RpcError::NotSubscribed(_) => ErrorCategory::Lifecycle,
            RpcError::NoAvailableProvider { .. } | RpcError::Registry { .. } => {
                ErrorCategory::Discovery
            }
            RpcError::Transport { .. } | RpcError::Io(_) => ErrorCategory::Network,
            RpcError::Remote { .. } => ErrorCategory::Remote,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Extension,
    Timeout,
    Lifecycle,
    Discovery,
    Network,
    Remote,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Extension => write!(f, "extension"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
            ErrorCategory::Discovery => write!(f, "discovery"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Remote => write!(f, "remote"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retriable() {
        let err = RpcError::timeout("bind dubbo://10.0.0.1:20880", Duration::from_secs(3));
        assert!(err.is_retriable());
        assert_eq!(
            err.to_string(),
            "Operation 'bind dubbo://10.0.0.1:20880' timed out after 3000 ms"
        );
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err = RpcError::config("service has no protocol");
        assert!(!err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_partial_export_inherits_retriability() {
        let err = RpcError::PartialExport {
            service: "demo.DemoService".to_string(),
            succeeded: 1,
            total: 2,
            source: Box::new(RpcError::timeout("register", Duration::from_millis(10))),
        };
        assert!(err.is_retriable());

        let err = RpcError::PartialExport {
            service: "demo.DemoService".to_string(),
            succeeded: 1,
            total: 2,
            source: Box::new(RpcError::ExtensionNotFound {
                capability: "registry".to_string(),
                scheme: "etcd".to_string(),
            }),
        };
        assert!(!err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Lifecycle);
    }

    #[test]
    fn test_no_provider_distinct_from_missing_extension() {
        let err = RpcError::NoAvailableProvider {
            service: "demo.DemoService".to_string(),
        };
        assert!(!err.is_extension_not_found());
        assert_eq!(err.category(), ErrorCategory::Discovery);
        assert_eq!(err.category().to_string(), "discovery");
    }
}
