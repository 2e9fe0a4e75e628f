//! Report staging.
//!
//! Writes collection outputs where the report viewer expects them:
//!
//! ```text
//! <report_dir>/<machine>/DiagCli.json                   raw analysis tool output
//! <report_dir>/DiagnosticAnalysis-<stem>.html           redirect stub
//! <output_dir>/<machine>/reportdata/stackDump.json      parsed thread dump
//! <output_dir>/ThreadDump-<stem>.html                   redirect stub
//! <output_dir>/stacks.json                              live stack capture
//! ```
//!
//! Redirect stubs point at the viewer with the staged file's public path as a
//! query parameter. The public path is the local path with the temp prefix
//! replaced by the public virtual prefix, case-folded.

use std::fs;
use std::path::{Path, PathBuf};

use dk_common::{AnalysisRunResult, ThreadDumpReport, ThreadRecord};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::ReportConfig;
use crate::logging::event_names;

/// Public virtual prefix replacing the local temp prefix.
pub const DEFAULT_PUBLIC_PREFIX: &str = "/api/vfs/data";

/// Viewer page the redirect stubs target.
pub const DEFAULT_VIEWER_PATH: &str = "/diagnostics/viewer.html";

/// Query parameter carrying the staged file path.
pub const DEFAULT_QUERY_PARAM: &str = "file";

pub const ANALYSIS_OUTPUT_FILE: &str = "DiagCli.json";
pub const STACK_DUMP_FILE: &str = "stackDump.json";
pub const STACK_DUMP_DIR: &str = "reportdata";
pub const STACKS_FILE: &str = "stacks.json";
pub const UNSUPPORTED_MARKER_FILE: &str = "UnsupportedDumpFormat.log";

/// Characters left unescaped in the query value besides alphanumerics.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Errors while staging report files.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("dump file name '{file_name}' has no '_' separator")]
    MissingDelimiter { file_name: String },

    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ReportError> for dk_common::Error {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::MissingDelimiter { .. } | ReportError::NoFileName(_) => {
                dk_common::Error::InputContract(err.to_string())
            }
            ReportError::Io { source, .. } => dk_common::Error::Io(source),
            ReportError::Json(e) => dk_common::Error::Json(e),
        }
    }
}

/// Machine and process identity encoded in a dump file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpIdentity {
    pub machine: String,
    pub process: String,
}

/// Files written by one staging call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedReport {
    pub data_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stub_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_url: Option<String>,
}

fn file_name_of(path: &Path) -> Result<&str, ReportError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ReportError::NoFileName(path.to_path_buf()))
}

fn stem_of(path: &Path) -> Result<&str, ReportError> {
    path.file_stem()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ReportError::NoFileName(path.to_path_buf()))
}

/// Machine name of a crash artifact: text before the first `_` of the file
/// name, or the whole file name when that text is empty or absent.
pub fn machine_name(artifact: &Path) -> Result<String, ReportError> {
    let name = file_name_of(artifact)?;
    let prefix = name.split('_').next().filter(|m| !m.is_empty());
    Ok(prefix.unwrap_or(name).to_string())
}

/// Strict `<machine>_<process>[_...]` identity of a text dump.
pub fn dump_identity(dump: &Path) -> Result<DumpIdentity, ReportError> {
    let stem = stem_of(dump)?;
    let mut parts = stem.splitn(3, '_');
    let machine = parts.next().unwrap_or_default();
    let process = parts.next().ok_or_else(|| ReportError::MissingDelimiter {
        file_name: file_name_of(dump).unwrap_or(stem).to_string(),
    })?;
    if machine.is_empty() || process.is_empty() {
        return Err(ReportError::MissingDelimiter {
            file_name: stem.to_string(),
        });
    }
    Ok(DumpIdentity {
        machine: machine.to_string(),
        process: process.to_string(),
    })
}

fn slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Public path of a staged local file.
pub fn public_path(local: &Path, config: &ReportConfig) -> String {
    let local = slashes(local);
    let prefix = slashes(&config.effective_temp_prefix());
    let prefix = prefix.trim_end_matches('/');

    let public = match local.get(..prefix.len()) {
        Some(head) if !prefix.is_empty() && head.eq_ignore_ascii_case(prefix) => {
            let rest = &local[prefix.len()..];
            if rest.is_empty() || rest.starts_with('/') {
                format!("{}{}", config.public_prefix.trim_end_matches('/'), rest)
            } else {
                local.clone()
            }
        }
        _ => local.clone(),
    };
    public.to_lowercase()
}

/// Viewer URL for a staged local file.
pub fn viewer_url(local: &Path, config: &ReportConfig) -> String {
    let public = public_path(local, config);
    format!(
        "{}?{}={}",
        config.viewer_path,
        config.query_param,
        utf8_percent_encode(&public, QUERY_VALUE)
    )
}

fn escape_attr(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Minimal page that forwards the browser to `url`.
pub fn redirect_stub_html(url: &str) -> String {
    let url = escape_attr(url);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"0; url={url}\">\n\
         <title>Diagnostic report</title>\n</head>\n<body>\n\
         <a href=\"{url}\">Open diagnostic report</a>\n</body>\n</html>\n"
    )
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(event = event_names::REPORT_WRITTEN, path = %path.display(), "report file written");
    Ok(())
}

fn write_stub(stub: &Path, data: &Path, config: &ReportConfig) -> Result<String, ReportError> {
    let url = viewer_url(data, config);
    write_file(stub, redirect_stub_html(&url).as_bytes())?;
    Ok(url)
}

/// Persist raw analysis output and its redirect stub.
pub fn stage_analysis(
    result: &AnalysisRunResult,
    artifact: &Path,
    report_dir: &Path,
    config: &ReportConfig,
) -> Result<StagedReport, ReportError> {
    let machine = machine_name(artifact)?;
    let stem = stem_of(artifact)?;

    let data_path = report_dir.join(&machine).join(ANALYSIS_OUTPUT_FILE);
    write_file(&data_path, result.raw_output.as_bytes())?;

    let stub_path = report_dir.join(format!("DiagnosticAnalysis-{stem}.html"));
    let url = write_stub(&stub_path, &data_path, config)?;

    Ok(StagedReport {
        data_path,
        stub_path: Some(stub_path),
        viewer_url: Some(url),
    })
}

/// Persist a parsed thread dump and its redirect stub.
pub fn stage_thread_dump(
    report: &ThreadDumpReport,
    dump: &Path,
    output_dir: &Path,
    config: &ReportConfig,
) -> Result<StagedReport, ReportError> {
    let identity = dump_identity(dump)?;
    let stem = stem_of(dump)?;

    let data_path = output_dir
        .join(&identity.machine)
        .join(STACK_DUMP_DIR)
        .join(STACK_DUMP_FILE);
    write_file(&data_path, serde_json::to_string_pretty(report)?.as_bytes())?;

    let stub_path = output_dir.join(format!("ThreadDump-{stem}.html"));
    let url = write_stub(&stub_path, &data_path, config)?;

    Ok(StagedReport {
        data_path,
        stub_path: Some(stub_path),
        viewer_url: Some(url),
    })
}

/// Persist live-captured thread records as a pretty JSON array.
pub fn stage_stacks(
    records: &[ThreadRecord],
    output_dir: &Path,
) -> Result<StagedReport, ReportError> {
    let data_path = output_dir.join(STACKS_FILE);
    let body = serde_json::to_string_pretty(records)?;
    write_file(&data_path, body.as_bytes())?;
    Ok(StagedReport {
        data_path,
        stub_path: None,
        viewer_url: None,
    })
}

/// Leave a marker explaining why a dump was not processed.
pub fn write_unsupported_marker(dump: &Path, output_dir: &Path) -> Result<PathBuf, ReportError> {
    let path = output_dir.join(UNSUPPORTED_MARKER_FILE);
    let body = format!(
        "{}: unsupported dump format, expected a .{} text dump\n",
        dump.display(),
        crate::parse::DUMP_EXTENSION
    );
    write_file(&path, body.as_bytes())?;
    Ok(path)
}
