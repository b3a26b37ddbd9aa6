/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::{RpcError, RpcResult};
use crate::settings::RuntimeSettings;

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the process-wide subscriber described by `settings`
///
/// Fails with a configuration error when the log file cannot be created or
/// a global subscriber is already set.
pub fn init_logging(settings: &RuntimeSettings) -> RpcResult<()> {
    build_subscriber(settings)?
        .try_init()
        .map_err(|e| RpcError::config(format!("Logging already initialized: {}", e)))
}

/// Subscriber for `settings`: JSON lines into the log file when one is set,
/// compact human output on stdout otherwise
fn build_subscriber(settings: &RuntimeSettings) -> RpcResult<impl Subscriber + Send + Sync + 'static> {
    let output = match settings.log_file.as_deref() {
        Some(path) => file_layer(path)?,
        None => stdout_layer(),
    };
    Ok(tracing_subscriber::registry().with(output).with(build_filter(settings)?))
}

fn effective_level(settings: &RuntimeSettings) -> Level {
    if settings.verbose {
        Level::DEBUG
    } else {
        settings.log_level.to_tracing_level()
    }
}

fn build_filter(settings: &RuntimeSettings) -> RpcResult<EnvFilter> {
    let log_level = effective_level(settings);
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("orbit_rpc={}", log_level)))
        .map_err(|e| RpcError::config(format!("Failed to create log filter: {}", e)))
}

fn stdout_layer() -> OutputLayer {
    fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .boxed()
}

fn file_layer(log_path: &Path) -> RpcResult<OutputLayer> {
    let file = File::create(log_path).map_err(|e| {
        RpcError::config(format!("Failed to create log file '{}': {}", log_path.display(), e))
    })?;

    Ok(fmt::layer()
        .with_writer(Arc::new(file))
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json()
        .boxed())
}

/// Initialize logging with a test writer; safe to call from every test
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orbit_rpc=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}
