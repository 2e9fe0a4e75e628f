//! Diagkit Core Library
//!
//! This library provides the diagnostic-artifact collection primitives:
//! - Supervised, resource-bounded execution of the crash-dump analysis tool
//! - Live stack capture with noise filtering and duplicate suppression
//! - Textual thread-dump parsing
//! - Paginated, site-scoped crash artifact inventory
//! - Report staging (output layout, viewer redirect stubs)
//! - Configuration, logging, capability detection and exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod capabilities;
pub mod collect;
pub mod config;
pub mod exit_codes;
pub mod inventory;
pub mod logging;
pub mod parse;
pub mod report;
