//! Fuzz target for text thread-dump parsing.
//!
//! Every record produced must carry a stack hash and a non-empty state.

#![no_main]

use dk_core::parse::parse_thread_dump;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let report = parse_thread_dump(data);
    for thread in &report.threads {
        assert!(thread.stack_hash.is_some());
        assert!(!thread.state.is_empty());
    }
});
