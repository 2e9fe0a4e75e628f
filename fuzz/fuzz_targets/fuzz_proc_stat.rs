//! Fuzz target for /proc/[pid]/stat parsing.
//!
//! Tests that `parse_proc_stat_content` handles arbitrary input without panicking.

#![no_main]

use dk_core::collect::resource::parse_proc_stat_content;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = parse_proc_stat_content(data);
});
