//! Fuzz target for private-memory extraction from /proc/[pid]/status.

#![no_main]

use dk_core::collect::resource::parse_status_private_bytes;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = parse_status_private_bytes(data);
});
