//! Exit codes for the dk-core CLI.
//!
//! Capture and parse commands are lenient: an empty or partial result still
//! exits 0. Only argument errors, configuration errors, input-contract
//! violations, missing capabilities and output I/O failures are nonzero.
//!
//! Exit code ranges:
//! - 0: Success (including partial captures)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors (bugs, should be reported)

use dk_common::{Error, ErrorCategory};

/// Exit codes for dk-core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Command completed; results may be empty or partial.
    Clean = 0,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments or an input file that violates its naming contract
    ArgsError = 10,

    /// Required capability missing (analysis tool, procfs)
    CapabilityError = 11,

    /// Permission denied
    PermissionError = 12,

    /// Configuration file missing, malformed or invalid
    ConfigError = 13,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// Output could not be written
    IoError = 21,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// Check if this exit code is a user/environment error (codes 10-19).
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    /// Check if this exit code is an internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Get the error code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::CapabilityError => "ERR_CAPABILITY",
            ExitCode::PermissionError => "ERR_PERMISSION",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::PermissionDenied { .. } => ExitCode::PermissionError,
            Error::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                ExitCode::PermissionError
            }
            _ => match err.category() {
                ErrorCategory::Config => ExitCode::ConfigError,
                ErrorCategory::Input => ExitCode::ArgsError,
                ErrorCategory::Analysis | ErrorCategory::Platform => ExitCode::CapabilityError,
                ErrorCategory::Io => ExitCode::IoError,
                ErrorCategory::Collection | ErrorCategory::Inventory => ExitCode::InternalError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
