//! Error types for diagkit.
//!
//! Errors carry:
//! - Stable error codes for machine parsing
//! - Category classification for grouping
//! - Recoverability hints for schedulers
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Input Contract Violation
//!   Reason: dump file name 'worker.txt' has no '_' separator
//!   Fix: Name dumps '<machine>_<process>_...' so report paths can be derived.
//! ```
//!
//! # Machine-Facing Output
//!
//! ```json
//! {
//!   "code": 50,
//!   "category": "input",
//!   "message": "dump file name 'worker.txt' has no '_' separator",
//!   "recoverable": false,
//!   "context": { "file": "worker.txt" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for diagkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Live process collection errors (attach, enumerate).
    Collection,
    /// External analysis tool errors.
    Analysis,
    /// Remote artifact listing errors.
    Inventory,
    /// Input files that violate naming or format contracts.
    Input,
    /// File I/O and serialization errors.
    Io,
    /// Platform compatibility errors.
    Platform,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Collection => write!(f, "collection"),
            ErrorCategory::Analysis => write!(f, "analysis"),
            ErrorCategory::Inventory => write!(f, "inventory"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Platform => write!(f, "platform"),
        }
    }
}

/// Unified error type for diagkit.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Collection errors (20-29)
    #[error("stack collection failed: {0}")]
    Collection(String),

    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("permission denied attaching to process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("attach to process {pid} timed out after {timeout_ms}ms")]
    AttachTimeout { pid: u32, timeout_ms: u64 },

    // Analysis errors (30-39)
    #[error("analysis tool failed: {0}")]
    Analysis(String),

    #[error("analysis tool not found: {0}")]
    ToolNotFound(String),

    // Inventory errors (40-49)
    #[error("artifact listing failed: {0}")]
    Inventory(String),

    // Input contract errors (50-59)
    #[error("input contract violation: {0}")]
    InputContract(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Platform errors (70-79)
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl Error {
    /// Returns the stable error code for this error.
    ///
    /// - 10-19: Configuration errors
    /// - 20-29: Collection errors
    /// - 30-39: Analysis errors
    /// - 40-49: Inventory errors
    /// - 50-59: Input contract errors
    /// - 60-69: I/O errors
    /// - 70-79: Platform errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::Collection(_) => 20,
            Error::ProcessNotFound { .. } => 21,
            Error::PermissionDenied { .. } => 22,
            Error::AttachTimeout { .. } => 23,
            Error::Analysis(_) => 30,
            Error::ToolNotFound(_) => 31,
            Error::Inventory(_) => 40,
            Error::InputContract(_) => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::UnsupportedPlatform(_) => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,

            Error::Collection(_)
            | Error::ProcessNotFound { .. }
            | Error::PermissionDenied { .. }
            | Error::AttachTimeout { .. } => ErrorCategory::Collection,

            Error::Analysis(_) | Error::ToolNotFound(_) => ErrorCategory::Analysis,

            Error::Inventory(_) => ErrorCategory::Inventory,

            Error::InputContract(_) => ErrorCategory::Input,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,

            Error::UnsupportedPlatform(_) => ErrorCategory::Platform,
        }
    }

    /// Returns whether this error is potentially recoverable by retrying or
    /// adjusting the environment.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,

            Error::Collection(_) => true,
            Error::ProcessNotFound { .. } => false, // Target is gone
            Error::PermissionDenied { .. } => true, // Can elevate
            Error::AttachTimeout { .. } => true,

            Error::Analysis(_) => true,
            Error::ToolNotFound(_) => true, // Can install/configure

            Error::Inventory(_) => true,

            // Downstream naming depends on it; retrying the same file cannot help
            Error::InputContract(_) => false,

            Error::Io(_) => true,
            Error::Json(_) => true,

            Error::UnsupportedPlatform(_) => false,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Run 'dk-core config show' to inspect the resolved configuration and fix diagkit.json."
            }
            Error::Collection(_) => {
                "Retry the capture. If persistent, check that the target is responsive."
            }
            Error::ProcessNotFound { .. } => {
                "The target exited before capture completed. Re-run against a live process id."
            }
            Error::PermissionDenied { .. } => {
                "Run with elevated privileges or as the owner of the target process."
            }
            Error::AttachTimeout { .. } => {
                "The target did not respond in time. Retry, or raise stacks.attach_timeout_ms."
            }
            Error::Analysis(_) => "Inspect the tool's stderr in the run result and retry.",
            Error::ToolNotFound(_) => {
                "Install the analysis tool or point analysis.tool_path (or DIAGKIT_ANALYSIS_TOOL) at it."
            }
            Error::Inventory(_) => {
                "Check storage credentials and connectivity, then retry the listing."
            }
            Error::InputContract(_) => {
                "Name dumps '<machine>_<process>_...' so report paths can be derived."
            }
            Error::Io(_) => "Check disk space and permissions on the output directory.",
            Error::Json(_) => "The file is not valid JSON. Check its syntax or restore it.",
            Error::UnsupportedPlatform(_) => {
                "This feature is not available on your platform. Live capture requires Linux procfs."
            }
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::Collection(_) => "Stack Collection Error",
            Error::ProcessNotFound { .. } => "Process Not Found",
            Error::PermissionDenied { .. } => "Permission Denied",
            Error::AttachTimeout { .. } => "Attach Timeout",
            Error::Analysis(_) => "Analysis Failed",
            Error::ToolNotFound(_) => "Analysis Tool Missing",
            Error::Inventory(_) => "Artifact Listing Error",
            Error::InputContract(_) => "Input Contract Violation",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::UnsupportedPlatform(_) => "Unsupported Platform",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context (e.g., pid, file).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::ProcessNotFound { pid } | Error::PermissionDenied { pid } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
            }
            Error::AttachTimeout { pid, timeout_ms } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
                context.insert("timeout_ms".to_string(), serde_json::json!(timeout_ms));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Config("test".into()).code(), 10);
        assert_eq!(Error::ProcessNotFound { pid: 123 }.code(), 21);
        assert_eq!(Error::InputContract("x".into()).code(), 50);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::AttachTimeout {
                pid: 1,
                timeout_ms: 20_000
            }
            .category(),
            ErrorCategory::Collection
        );
        assert_eq!(
            Error::ToolNotFound("x".into()).category(),
            ErrorCategory::Analysis
        );
        assert_eq!(
            Error::InputContract("x".into()).category(),
            ErrorCategory::Input
        );
    }

    #[test]
    fn test_input_contract_not_recoverable() {
        assert!(!Error::InputContract("x".into()).is_recoverable());
        assert!(Error::AttachTimeout {
            pid: 1,
            timeout_ms: 1
        }
        .is_recoverable());
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::AttachTimeout {
            pid: 42,
            timeout_ms: 20_000,
        };
        let structured = StructuredError::from(&err).with_context("stage", "capture");
        assert_eq!(structured.code, 23);
        assert_eq!(structured.context["pid"], serde_json::json!(42));
        assert_eq!(structured.context["timeout_ms"], serde_json::json!(20_000));
        let json = structured.to_json();
        assert!(json.contains(r#""category":"collection""#));
    }

    #[test]
    fn test_format_error_human_plain() {
        let err = Error::ToolNotFound("diagcli".into());
        let text = format_error_human(&err, false);
        assert!(text.starts_with("✗ Analysis Tool Missing"));
        assert!(text.contains("Reason: analysis tool not found: diagcli"));
        assert!(text.contains("Fix:"));
    }
}
