//! Structured logging for dk-core.
//!
//! Two output modes, both on stderr:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for pipelines
//!
//! stdout is reserved for command payloads.
//!
//! ```ignore
//! use dk_core::logging::{init_logging, LogConfig, LogContext, Stage};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//!
//! let ctx = LogContext::new(generate_run_id(), get_host_id());
//! let _guard = ctx.span(Stage::Capture).entered();
//! tracing::info!(event = event_names::CAPTURE_FINISHED, threads = 12, "capture complete");
//! ```

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;

use sha2::{Digest, Sha256};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// Call once at startup. A second call is a no-op.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(format!("dk_core={}", config.level)));

    let result = match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };

    // Already initialized (tests, embedding callers)
    let _ = result;
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}

/// Host identifier for log correlation.
///
/// Uses machine-id on Linux, falling back to the hostname.
pub fn get_host_id() -> String {
    let machine_id = std::fs::read_to_string("/etc/machine-id").ok();
    let hostname = std::env::var("HOSTNAME").ok();
    host_id_from(machine_id.as_deref(), hostname.as_deref())
        .unwrap_or_else(|| format!("host-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]))
}

/// Derive a host id from a machine id (first 8 chars) or a hashed hostname.
fn host_id_from(machine_id: Option<&str>, hostname: Option<&str>) -> Option<String> {
    if let Some(prefix) = machine_id.and_then(|id| id.trim().get(..8)) {
        return Some(format!("host-{prefix}"));
    }

    let hostname = hostname.filter(|h| !h.is_empty())?;
    let digest = hex::encode(Sha256::digest(hostname.as_bytes()));
    Some(format!("host-{}", &digest[..8]))
}
