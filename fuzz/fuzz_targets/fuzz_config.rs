//! Fuzz target for diagkit.json parsing and validation.

#![no_main]

use dk_core::config::{parse_config, validate_config};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok((config, _hash)) = parse_config(data) {
        let _ = validate_config(&config);
        // Accepted configs must survive a serialization round trip.
        let text = serde_json::to_string(&config).expect("config serializes");
        let _ = serde_json::from_str::<serde_json::Value>(&text).expect("valid JSON");
    }
});
