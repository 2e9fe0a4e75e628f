//! Debug-attach collaborator contract.
//!
//! A [`DebugTarget`] attaches to a live process and hands back a
//! [`DebugSession`]. The session enumerates the runtimes loaded in the
//! target; each [`RuntimeView`] exposes live threads and their raw frames in
//! the order the backend returns them.
//!
//! [`AttachedSession`] owns a session and detaches when dropped, so every
//! exit path out of a capture (including `?` and panics) releases the target.

use std::time::Duration;

use dk_common::ThreadRoles;
use thiserror::Error;
use tracing::debug;

/// Errors raised by attach backends.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("attach to process {pid} timed out after {timeout:?}")]
    Timeout { pid: u32, timeout: Duration },

    #[error("permission denied for process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("frames unavailable for thread {os_thread_id}: {reason}")]
    FramesUnavailable { os_thread_id: u64, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttachError {
    /// Whether the whole capture must stop.
    ///
    /// Per-thread frame failures are tolerable; a vanished or unresponsive
    /// target is not.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            AttachError::ProcessNotFound { .. }
                | AttachError::Timeout { .. }
                | AttachError::PermissionDenied { .. }
        )
    }
}

impl From<AttachError> for dk_common::Error {
    fn from(err: AttachError) -> Self {
        match err {
            AttachError::ProcessNotFound { pid } => dk_common::Error::ProcessNotFound { pid },
            AttachError::PermissionDenied { pid } => dk_common::Error::PermissionDenied { pid },
            AttachError::Timeout { pid, timeout } => dk_common::Error::AttachTimeout {
                pid,
                timeout_ms: timeout.as_millis() as u64,
            },
            AttachError::Io(e) => dk_common::Error::Io(e),
            other => dk_common::Error::Collection(other.to_string()),
        }
    }
}

/// A runtime loaded in the target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeVersion {
    /// Runtime family, e.g. `coreclr` or `native`.
    pub flavor: String,
    pub version: String,
}

impl RuntimeVersion {
    pub fn new(flavor: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            flavor: flavor.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.flavor, self.version)
    }
}

/// Identity and state of one live thread, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveThread {
    pub os_thread_id: u64,
    /// Runtime-assigned id; absent for purely native threads.
    pub managed_thread_id: Option<u64>,
    pub name: Option<String>,
    pub roles: ThreadRoles,
    pub state: String,
    pub state_detail: Option<String>,
}

/// Attaches to processes.
pub trait DebugTarget {
    /// Attach without suspending the target, failing after `timeout`.
    fn attach(&self, pid: u32, timeout: Duration) -> Result<Box<dyn DebugSession>, AttachError>;
}

/// An attached process.
pub trait DebugSession {
    fn set_symbol_path(&mut self, path: &str);

    fn runtime_versions(&self) -> Result<Vec<RuntimeVersion>, AttachError>;

    fn runtime(&self, version: &RuntimeVersion) -> Result<Box<dyn RuntimeView + '_>, AttachError>;

    /// Release the target. Must be safe to call on a session whose target
    /// has already exited.
    fn detach(&mut self);
}

/// Threads of one runtime inside an attached process.
pub trait RuntimeView {
    fn live_threads(&self) -> Result<Vec<LiveThread>, AttachError>;

    /// Raw frames of `thread`, innermost first, unfiltered.
    fn raw_stack_frames(&self, thread: &LiveThread) -> Result<Vec<String>, AttachError>;
}

/// Scoped ownership of a session; detaches on drop.
pub struct AttachedSession {
    session: Box<dyn DebugSession>,
    pid: u32,
}

impl AttachedSession {
    pub fn new(session: Box<dyn DebugSession>, pid: u32) -> Self {
        Self { session, pid }
    }

    pub fn session(&self) -> &dyn DebugSession {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> &mut dyn DebugSession {
        self.session.as_mut()
    }
}

impl Drop for AttachedSession {
    fn drop(&mut self) {
        self.session.detach();
        debug!(pid = self.pid, "detached from target");
    }
}
