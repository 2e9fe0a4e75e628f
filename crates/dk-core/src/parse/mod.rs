//! Offline parsers for captured diagnostic text.

pub mod thread_dump;

pub use thread_dump::{
    is_thread_start, parse_state_line, parse_thread_dump, parse_thread_header, ThreadHeader,
    DUMP_FRAME_SEPARATOR,
};

use std::path::Path;

use dk_common::ThreadDumpReport;

/// Extension a text thread dump must carry to be processed.
pub const DUMP_EXTENSION: &str = "txt";

/// Whether `path` has the text dump extension (case-insensitive).
pub fn is_supported_dump(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(DUMP_EXTENSION))
}

/// Read and parse a thread dump file. Invalid UTF-8 is replaced, not rejected.
pub fn parse_thread_dump_file(path: &Path) -> dk_common::Result<ThreadDumpReport> {
    let bytes = std::fs::read(path)?;
    Ok(parse_thread_dump(&String::from_utf8_lossy(&bytes)))
}
