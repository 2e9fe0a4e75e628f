//! Evidence collection.
//!
//! This module provides the collection layer for diagkit:
//! - Supervised execution of the external crash-dump analysis tool
//! - Live stack capture through a pluggable debugger attach seam
//! - Noise-frame filtering and per-run duplicate stack suppression
//! - procfs parsers shared by resource sampling and the native attach target

pub mod debug_attach;
pub mod dedup;
pub mod frame_filter;
pub mod live_stacks;
pub mod procfs_target;
pub mod resource;
pub mod supervisor;

pub use debug_attach::{
    AttachError, AttachedSession, DebugSession, DebugTarget, LiveThread, RuntimeVersion,
    RuntimeView,
};
pub use dedup::{hash_frames, ThreadRecordDeduplicator, LIVE_FRAME_SEPARATOR, MIN_HASHED_DEPTH};
pub use frame_filter::{StackFrameFilter, EXCLUDED_FRAMES, EXCLUDED_SUBSTRINGS};
pub use live_stacks::{
    CollectorConfig, LiveStackCollector, DEFAULT_ATTACH_TIMEOUT_MS, DEFAULT_MAX_THREADS,
};
pub use procfs_target::ProcfsTarget;
pub use resource::{ProcfsSampler, ResourceSampler, ScriptedSampler};
pub use supervisor::{
    parse_payload, Lifecycle, ResourceLimits, Supervisor, SupervisorConfig, SupervisorError,
    DEFAULT_CPU_CEILING_SECS, DEFAULT_DRAIN_GRACE_MS, DEFAULT_MEMORY_CEILING_BYTES,
    DEFAULT_POLL_INTERVAL_MS,
};
