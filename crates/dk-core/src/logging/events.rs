//! Structured event definitions for logging.
//!
//! Every event carries the run id, host id and pipeline stage so JSONL
//! output from concurrent invocations can be correlated.

use serde::{Deserialize, Serialize};

/// Log levels as they appear in JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Remote artifact listing.
    Inventory,
    /// Supervised analysis tool run.
    Analyze,
    /// Live stack capture.
    Capture,
    /// Text thread-dump parsing.
    Parse,
    /// Report and redirect-stub writing.
    Report,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Inventory => "inventory",
            Stage::Analyze => "analyze",
            Stage::Capture => "capture",
            Stage::Parse => "parse",
            Stage::Report => "report",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";

    // Analyze stage
    pub const ANALYZE_SPAWNED: &str = "analyze.spawned";
    pub const ANALYZE_SAMPLE: &str = "analyze.sample";
    pub const ANALYZE_BREACH: &str = "analyze.breach";
    pub const ANALYZE_EXITED: &str = "analyze.exited";

    // Capture stage
    pub const CAPTURE_ATTACHED: &str = "capture.attached";
    pub const CAPTURE_FRAME_ERROR: &str = "capture.frame_error";
    pub const CAPTURE_FINISHED: &str = "capture.finished";

    // Parse stage
    pub const PARSE_FINISHED: &str = "parse.finished";

    // Inventory stage
    pub const INVENTORY_PAGE: &str = "inventory.page";
    pub const INVENTORY_FINISHED: &str = "inventory.finished";

    // Report stage
    pub const REPORT_WRITTEN: &str = "report.written";
}

/// Correlation ids shared by every event of one invocation.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Unique ID for this invocation.
    pub run_id: String,
    /// Host identifier.
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }

    /// Root span for a command; events inside inherit run, host and stage.
    pub fn span(&self, stage: Stage) -> tracing::Span {
        tracing::info_span!(
            "dk",
            run_id = %self.run_id,
            host_id = %self.host_id,
            stage = %stage
        )
    }
}
