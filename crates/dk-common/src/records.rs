//! Thread records produced by stack capture and thread-dump parsing.
//!
//! A [`ThreadRecord`] is owned by the collection run that built it. Once a run
//! hands its records back to the caller they are treated as immutable
//! snapshots; consumers serialize them for reporting.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Role flags a managed runtime attaches to a thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ThreadRoles {
    /// Dedicated garbage-collector thread.
    #[serde(default)]
    pub gc: bool,
    /// Finalizer thread.
    #[serde(default)]
    pub finalizer: bool,
    /// Thread-pool worker.
    #[serde(default)]
    pub threadpool_worker: bool,
    /// Thread-pool I/O completion thread.
    #[serde(default)]
    pub threadpool_completion_port: bool,
    /// Thread-pool timer thread.
    #[serde(default)]
    pub threadpool_timer: bool,
    /// Background (daemon) thread.
    #[serde(default)]
    pub background: bool,
    /// Runtime debugger helper thread.
    #[serde(default)]
    pub debugger_helper: bool,
}

impl ThreadRoles {
    /// True when no role flag is set.
    pub fn is_empty(&self) -> bool {
        *self == ThreadRoles::default()
    }
}

/// A single thread with its call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ThreadRecord {
    /// Runtime-level thread id (managed id, or the `#` id of a text dump).
    pub thread_id: u64,

    /// Operating-system thread id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_thread_id: Option<u64>,

    /// Thread name, when the source exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Runtime role flags; omitted when none are set.
    #[serde(default, skip_serializing_if = "ThreadRoles::is_empty")]
    pub roles: ThreadRoles,

    /// Ordered call-stack frames, innermost first.
    ///
    /// Empty when the stack was suppressed as a duplicate of an earlier
    /// thread in the same run.
    #[serde(default)]
    pub call_stack: Vec<String>,

    /// Hex digest of the frame list, when one was computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_hash: Option<String>,

    /// Textual thread state.
    pub state: String,

    /// Additional state detail (e.g. the parenthetical of `TIMED_WAITING (sleeping)`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_detail: Option<String>,
}

impl ThreadRecord {
    /// Create a record with an empty stack and unknown state.
    pub fn new(thread_id: u64) -> Self {
        Self {
            thread_id,
            os_thread_id: None,
            name: None,
            roles: ThreadRoles::default(),
            call_stack: Vec::new(),
            stack_hash: None,
            state: UNKNOWN_STATE.to_string(),
            state_detail: None,
        }
    }

    /// Number of frames currently held.
    pub fn depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Whether the stack body was cleared as a duplicate.
    pub fn is_suppressed_duplicate(&self) -> bool {
        self.stack_hash.is_some() && self.call_stack.is_empty()
    }
}

/// State text used when the source does not report one.
pub const UNKNOWN_STATE: &str = "UNKNOWN";

/// Result of parsing a textual thread dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ThreadDumpReport {
    /// Deadlock banner found ahead of the first thread, line-joined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadlock_message: Option<String>,

    /// Threads in dump order.
    pub threads: Vec<ThreadRecord>,
}

impl ThreadDumpReport {
    /// Whether the dump reported a deadlock.
    pub fn has_deadlock(&self) -> bool {
        self.deadlock_message.is_some()
    }
}
