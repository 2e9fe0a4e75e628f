//! JSON Schema generation for record types.
//!
//! Consumers of `stacks.json`, `stackDump.json` and analysis run output can
//! validate against these schemas:
//!
//! ```bash
//! dk-core schema thread-record
//! dk-core schema analysis-run
//! ```

use clap::ValueEnum;
use schemars::schema_for;
use serde_json::Value;

use crate::artifact::{AnalysisRunResult, CrashArtifactDescriptor};
use crate::records::{ThreadDumpReport, ThreadRecord};

/// Version stamped on configuration files and emitted documents.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Record types with a published schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordKind {
    /// One captured or parsed thread.
    ThreadRecord,
    /// Parsed text thread dump.
    ThreadDump,
    /// Supervised analysis run.
    AnalysisRun,
    /// Inventory entry for a stored crash artifact.
    CrashArtifact,
}

impl RecordKind {
    /// Type name used as the schema title.
    pub fn type_name(&self) -> &'static str {
        match self {
            RecordKind::ThreadRecord => "ThreadRecord",
            RecordKind::ThreadDump => "ThreadDumpReport",
            RecordKind::AnalysisRun => "AnalysisRunResult",
            RecordKind::CrashArtifact => "CrashArtifactDescriptor",
        }
    }

    /// Generate the JSON Schema for this record kind.
    pub fn schema_json(&self) -> Value {
        let schema = match self {
            RecordKind::ThreadRecord => schema_for!(ThreadRecord),
            RecordKind::ThreadDump => schema_for!(ThreadDumpReport),
            RecordKind::AnalysisRun => schema_for!(AnalysisRunResult),
            RecordKind::CrashArtifact => schema_for!(CrashArtifactDescriptor),
        };
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_titled_schema() {
        for kind in RecordKind::value_variants() {
            let schema = kind.schema_json();
            assert_eq!(
                schema.get("title").and_then(|t| t.as_str()),
                Some(kind.type_name()),
                "schema for {:?}",
                kind
            );
        }
    }

    #[test]
    fn thread_record_schema_names_fields() {
        let schema = RecordKind::ThreadRecord.schema_json();
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("thread_id"));
        assert!(props.contains_key("call_stack"));
        assert!(props.contains_key("stack_hash"));
    }
}
