//! Content-hash suppression of repeated call stacks.
//!
//! One [`ThreadRecordDeduplicator`] lives for exactly one collection run.
//! The first thread with a given stack keeps its frames; later threads with
//! the same stack keep their metadata and hash but lose the frame list.

use std::collections::HashSet;

use dk_common::ThreadRecord;
use sha2::{Digest, Sha256};

/// Stacks at or below this depth are never hashed.
pub const MIN_HASHED_DEPTH: usize = 3;

/// Frame separator used for live-capture hashes.
pub const LIVE_FRAME_SEPARATOR: &str = "\n";

/// SHA-256 over the frames joined by `separator`, hex-encoded.
pub fn hash_frames<S: AsRef<str>>(frames: &[S], separator: &str) -> String {
    let mut hasher = Sha256::new();
    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            hasher.update(separator.as_bytes());
        }
        hasher.update(frame.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Per-run set of stack hashes already emitted.
#[derive(Debug, Default)]
pub struct ThreadRecordDeduplicator {
    seen: HashSet<String>,
}

impl ThreadRecordDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash the record's (already filtered) stack and suppress repeats.
    ///
    /// Returns true when the stack body was cleared.
    pub fn apply(&mut self, record: &mut ThreadRecord) -> bool {
        if record.call_stack.len() <= MIN_HASHED_DEPTH {
            record.stack_hash = None;
            return false;
        }

        let hash = hash_frames(&record.call_stack, LIVE_FRAME_SEPARATOR);
        let first = self.seen.insert(hash.clone());
        record.stack_hash = Some(hash);
        if !first {
            record.call_stack.clear();
        }
        !first
    }

    /// Number of distinct hashed stacks seen in this run.
    pub fn distinct(&self) -> usize {
        self.seen.len()
    }
}
