//! Diagkit common types and errors.
//!
//! This crate provides the structured records shared by the dk-core
//! collection pipeline and its consumers:
//! - Thread records produced by live stack capture and dump parsing
//! - Analysis run results from the supervised analysis tool
//! - Crash artifact descriptors from the artifact inventory
//! - Common error types and output format specifications

pub mod artifact;
pub mod error;
pub mod output;
pub mod records;
pub mod schema;

pub use artifact::{
    AnalysisAssets, AnalysisPayload, AnalysisRunResult, BreachKind, CrashArtifactDescriptor,
    InterpretedResult, ProcessOutcome, ProcessResourceSample, ResourceBreach,
};
pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError};
pub use output::OutputFormat;
pub use records::{ThreadDumpReport, ThreadRecord, ThreadRoles, UNKNOWN_STATE};
pub use schema::{RecordKind, SCHEMA_VERSION};
