//! Crash artifact descriptors and analysis run results.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One resource reading of a supervised process, taken on a poll tick.
///
/// CPU times are cumulative since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessResourceSample {
    /// User-mode CPU seconds.
    pub user_cpu_secs: f64,
    /// Kernel-mode (privileged) CPU seconds.
    pub privileged_cpu_secs: f64,
    /// User + privileged CPU seconds.
    pub total_cpu_secs: f64,
    /// Private (non-shared) memory in bytes.
    pub private_memory_bytes: u64,
}

impl ProcessResourceSample {
    /// Build a sample from user and privileged CPU seconds.
    pub fn new(user_cpu_secs: f64, privileged_cpu_secs: f64, private_memory_bytes: u64) -> Self {
        Self {
            user_cpu_secs,
            privileged_cpu_secs,
            total_cpu_secs: user_cpu_secs + privileged_cpu_secs,
            private_memory_bytes,
        }
    }
}

/// Which ceiling a supervised process crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BreachKind {
    /// Total CPU time exceeded the ceiling.
    Cpu,
    /// Private memory exceeded the ceiling.
    Memory,
}

impl std::fmt::Display for BreachKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreachKind::Cpu => write!(f, "cpu"),
            BreachKind::Memory => write!(f, "memory"),
        }
    }
}

/// The measurements that triggered a forced termination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceBreach {
    /// Ceiling that was crossed.
    pub kind: BreachKind,
    /// The sample that crossed it.
    pub sample: ProcessResourceSample,
    /// Poll tick (zero-based) on which the sample was taken.
    pub tick: u32,
}

/// Terminal outcome of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The process exited on its own.
    Exited {
        /// Exit code, absent when terminated by a signal.
        exit_code: Option<i32>,
    },
    /// The supervisor killed the process for crossing a resource ceiling.
    KilledForResourceBreach {
        /// Measurements at the time of the kill.
        breach: ResourceBreach,
    },
}

impl ProcessOutcome {
    /// Whether the supervisor had to kill the process.
    pub fn was_killed(&self) -> bool {
        matches!(self, ProcessOutcome::KilledForResourceBreach { .. })
    }
}

/// One interpreted finding emitted by the analysis tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterpretedResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields the tool emits that this model does not name.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Asset section of the analysis payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisAssets {
    /// Loaded runtime module inventory, kept as emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clrmodule: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Structured document the analysis tool writes to stdout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    #[serde(default)]
    pub interpreted_results: Vec<InterpretedResult>,
    #[serde(default)]
    pub assets: AnalysisAssets,
}

/// Everything the supervisor learned from one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisRunResult {
    /// Artifact the tool was pointed at.
    pub artifact: String,
    /// Wall time from spawn to exit.
    pub elapsed_ms: u64,
    /// How the process ended.
    pub outcome: ProcessOutcome,
    /// Readings taken on each poll tick, in order.
    pub samples: Vec<ProcessResourceSample>,
    /// Captured standard output.
    pub raw_output: String,
    /// Captured standard error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diagnostics_output: String,
    /// Parsed payload; absent when the output was empty or not valid JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<AnalysisPayload>,
}

impl AnalysisRunResult {
    /// Highest total CPU seconds seen across samples.
    pub fn peak_cpu_secs(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.total_cpu_secs)
            .fold(0.0, f64::max)
    }

    /// Highest private memory seen across samples.
    pub fn peak_private_bytes(&self) -> u64 {
        self.samples
            .iter()
            .map(|s| s.private_memory_bytes)
            .max()
            .unwrap_or(0)
    }
}

/// A crash artifact found in remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CrashArtifactDescriptor {
    /// Final path segment.
    pub file_name: String,
    /// Path relative to the storage container.
    pub relative_path: String,
    /// Full locator; only present when the caller asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_locator: Option<String>,
    /// Creation time; the Unix epoch when storage did not report one.
    pub created: DateTime<Utc>,
    /// Exit code token embedded in the file name (e.g. `0xC00000FD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<String>,
}
