//! Configuration loading and validation for dk-core.
//!
//! This module handles:
//! - Loading `diagkit.json`
//! - Config resolution order (CLI > env > XDG > defaults)
//! - Schema validation (shape/type checking via serde)
//! - Semantic validation (positive intervals and ceilings)
//! - Environment overrides for deployment-specific values

pub mod validation;

pub use validation::{validate_config, ValidationError};

use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::collect::live_stacks::{DEFAULT_ATTACH_TIMEOUT_MS, DEFAULT_MAX_THREADS};
use crate::collect::supervisor::{
    DEFAULT_CPU_CEILING_SECS, DEFAULT_DRAIN_GRACE_MS, DEFAULT_MEMORY_CEILING_BYTES,
    DEFAULT_POLL_INTERVAL_MS,
};
use crate::inventory::ARTIFACT_DIRECTORY;
use crate::logging::event_names;
use crate::report::{DEFAULT_PUBLIC_PREFIX, DEFAULT_QUERY_PARAM, DEFAULT_VIEWER_PATH};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = dk_common::SCHEMA_VERSION;

/// Config file name inside a config directory.
pub const CONFIG_FILE_NAME: &str = "diagkit.json";

/// Default XDG config directory name.
const CONFIG_DIR_NAME: &str = "diagkit";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl From<ConfigError> for dk_common::Error {
    fn from(err: ConfigError) -> Self {
        dk_common::Error::Config(err.to_string())
    }
}

/// Analysis tool supervision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Analysis executable; must be configured before `analyze` can run.
    pub tool_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub cpu_ceiling_secs: f64,
    pub memory_ceiling_bytes: u64,
    /// How long to wait for output readers after the tool exits.
    pub drain_grace_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            cpu_ceiling_secs: DEFAULT_CPU_CEILING_SECS,
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING_BYTES,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
        }
    }
}

/// Live stack capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StacksConfig {
    pub attach_timeout_ms: u64,
    /// Threads processed per runtime view.
    pub max_threads: usize,
    pub symbol_path: Option<String>,
    /// Appended to the built-in exact-match frame exclusions.
    pub extra_excluded_frames: Vec<String>,
    /// Appended to the built-in substring frame exclusions.
    pub extra_excluded_substrings: Vec<String>,
}

impl Default for StacksConfig {
    fn default() -> Self {
        Self {
            attach_timeout_ms: DEFAULT_ATTACH_TIMEOUT_MS,
            max_threads: DEFAULT_MAX_THREADS,
            symbol_path: None,
            extra_excluded_frames: Vec::new(),
            extra_excluded_substrings: Vec::new(),
        }
    }
}

/// Report staging and viewer URL settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReportConfig {
    /// Local temp prefix swapped for the public prefix; defaults to the OS temp dir.
    pub local_temp_prefix: Option<PathBuf>,
    pub public_prefix: String,
    pub viewer_path: String,
    pub query_param: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            local_temp_prefix: None,
            public_prefix: DEFAULT_PUBLIC_PREFIX.to_string(),
            viewer_path: DEFAULT_VIEWER_PATH.to_string(),
            query_param: DEFAULT_QUERY_PARAM.to_string(),
        }
    }
}

impl ReportConfig {
    pub fn effective_temp_prefix(&self) -> PathBuf {
        self.local_temp_prefix
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Artifact inventory settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct InventoryConfig {
    /// Storage root for the local listing backend; absent means no storage.
    pub root: Option<PathBuf>,
    /// Logical directory listed under the root.
    pub directory: String,
    pub site_name: Option<String>,
    pub page_size: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            root: None,
            directory: ARTIFACT_DIRECTORY.to_string(),
            site_name: None,
            page_size: 100,
        }
    }
}

/// Complete `diagkit.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DiagkitConfig {
    pub schema_version: String,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub stacks: StacksConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

impl Default for DiagkitConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            analysis: AnalysisConfig::default(),
            stacks: StacksConfig::default(),
            report: ReportConfig::default(),
            inventory: InventoryConfig::default(),
        }
    }
}

impl DiagkitConfig {
    /// Apply `DIAGKIT_*` environment overrides through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(site) = non_empty("DIAGKIT_SITE_NAME") {
            self.inventory.site_name = Some(site);
            applied.push("DIAGKIT_SITE_NAME");
        }
        if let Some(symbols) = non_empty("DIAGKIT_SYMBOL_PATH") {
            self.stacks.symbol_path = Some(symbols);
            applied.push("DIAGKIT_SYMBOL_PATH");
        }
        if let Some(tool) = non_empty("DIAGKIT_ANALYSIS_TOOL") {
            self.analysis.tool_path = Some(PathBuf::from(tool));
            applied.push("DIAGKIT_ANALYSIS_TOOL");
        }
        applied
    }
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: DiagkitConfig,
    /// Path to the loaded file (None if using defaults).
    pub config_path: Option<PathBuf>,
    /// SHA-256 of the file content (None if using defaults).
    pub config_hash: Option<String>,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<&'static str>,
}

impl ResolvedConfig {
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            config_path: self.config_path.clone(),
            config_hash: self.config_hash.clone(),
            env_overrides: self.env_overrides.iter().map(|s| s.to_string()).collect(),
            config: self.config.clone(),
        }
    }
}

/// Serializable view of the resolved configuration (`config show`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConfigSnapshot {
    pub config_path: Option<PathBuf>,
    pub config_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_overrides: Vec<String>,
    pub config: DiagkitConfig,
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub config_path: Option<PathBuf>,
    /// Explicit config directory.
    pub config_dir: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit `--config` file (must exist)
/// 2. Explicit `--config-dir`
/// 3. `DIAGKIT_CONFIG` directory
/// 4. XDG config home (`~/.config/diagkit/`)
/// 5. Built-in defaults
///
/// Environment overrides are applied last, then the result is validated.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    load_config_with(options, |key| std::env::var(key).ok())
}

/// [`load_config`] with an injectable environment lookup.
pub fn load_config_with<F>(
    options: &ConfigOptions,
    lookup: F,
) -> Result<ResolvedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut config, config_path, config_hash) = match &options.config_path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound { path: path.clone() });
            }
            let (config, hash) = load_config_from_file(path)?;
            (config, Some(path.clone()), Some(hash))
        }
        None => {
            let default_path = resolve_config_dir(options, &lookup).join(CONFIG_FILE_NAME);
            if default_path.exists() {
                let (config, hash) = load_config_from_file(&default_path)?;
                (config, Some(default_path), Some(hash))
            } else {
                debug!(
                    event = event_names::CONFIG_DEFAULT_USED,
                    searched = %default_path.display(),
                    "no config file found, using defaults"
                );
                (DiagkitConfig::default(), None, None)
            }
        }
    };

    let env_overrides = config.apply_env_overrides(&lookup);
    validate_config(&config)?;

    if let (Some(path), Some(hash)) = (&config_path, &config_hash) {
        info!(
            event = event_names::CONFIG_LOADED,
            path = %path.display(),
            hash = %hash,
            env_overrides = env_overrides.len(),
            "config loaded"
        );
    }

    Ok(ResolvedConfig {
        config,
        config_path,
        config_hash,
        env_overrides,
    })
}

/// Resolve the config directory using the standard resolution order.
fn resolve_config_dir<F>(options: &ConfigOptions, lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = &options.config_dir {
        return dir.clone();
    }

    if let Some(dir) = lookup("DIAGKIT_CONFIG") {
        return PathBuf::from(dir);
    }

    let xdg_config = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        });

    xdg_config.join(CONFIG_DIR_NAME)
}

/// Load and version-check a config file, returning it with its content hash.
pub fn load_config_from_file(path: &Path) -> Result<(DiagkitConfig, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let (config, hash) = parse_config(&content).map_err(|e| match e {
        ConfigError::ParseError { source, .. } => ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    Ok((config, hash))
}

/// Parse config text without touching the filesystem.
pub fn parse_config(content: &str) -> Result<(DiagkitConfig, String), ConfigError> {
    let hash = compute_hash(content);

    let config: DiagkitConfig =
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            source: e,
        })?;

    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::VersionMismatch {
            expected: CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    Ok((config, hash))
}

/// SHA-256 of config content, hex-encoded.
fn compute_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_loads() {
        let dir = TempDir::new().unwrap();
        let options = ConfigOptions {
            config_path: None,
            config_dir: Some(dir.path().to_path_buf()),
        };
        let resolved = load_config_with(&options, env(&[])).unwrap();
        assert!(resolved.config_path.is_none());
        assert_eq!(resolved.config.analysis.poll_interval_ms, 1000);
        assert_eq!(resolved.config.stacks.attach_timeout_ms, 20_000);
        assert_eq!(resolved.config.stacks.max_threads, 1000);
        assert_eq!(
            resolved.config.analysis.memory_ceiling_bytes,
            800 * 1024 * 1024
        );
    }

    #[test]
    fn config_dir_file_is_loaded_and_hashed() {
        let dir = TempDir::new().unwrap();
        let content = r#"{"schema_version":"1.0.0","analysis":{"poll_interval_ms":250}}"#;
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), content).unwrap();

        let options = ConfigOptions {
            config_path: None,
            config_dir: Some(dir.path().to_path_buf()),
        };
        let resolved = load_config_with(&options, env(&[])).unwrap();
        assert_eq!(resolved.config.analysis.poll_interval_ms, 250);
        // Unspecified fields keep defaults
        assert_eq!(resolved.config.analysis.cpu_ceiling_secs, 300.0);
        let hash = resolved.config_hash.unwrap();
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn diagkit_config_env_selects_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"schema_version":"1.0.0","inventory":{"site_name":"from-file"}}"#,
        )
        .unwrap();
        let dir_str = dir.path().to_string_lossy().to_string();
        let lookup = env(&[("DIAGKIT_CONFIG", &dir_str)]);
        let resolved = load_config_with(&ConfigOptions::default(), lookup).unwrap();
        assert_eq!(
            resolved.config.inventory.site_name.as_deref(),
            Some("from-file")
        );
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let options = ConfigOptions {
            config_path: Some(PathBuf::from("/nonexistent/diagkit.json")),
            config_dir: None,
        };
        let err = load_config_with(&options, env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn version_mismatch_rejected() {
        let err = parse_config(r#"{"schema_version":"0.9.0"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::VersionMismatch { .. }));
    }

    #[test]
    fn malformed_json_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config_from_file(&path).unwrap_err();
        match err {
            ConfigError::ParseError { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_overrides_win_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(
            &path,
            r#"{"schema_version":"1.0.0","inventory":{"site_name":"a"},"stacks":{"symbol_path":"x"}}"#,
        )
        .unwrap();
        let options = ConfigOptions {
            config_path: Some(path),
            config_dir: None,
        };
        let resolved = load_config_with(
            &options,
            env(&[
                ("DIAGKIT_SITE_NAME", "site1"),
                ("DIAGKIT_SYMBOL_PATH", "srv*cache"),
                ("DIAGKIT_ANALYSIS_TOOL", "/opt/diag/tool"),
            ]),
        )
        .unwrap();
        assert_eq!(
            resolved.config.inventory.site_name.as_deref(),
            Some("site1")
        );
        assert_eq!(
            resolved.config.stacks.symbol_path.as_deref(),
            Some("srv*cache")
        );
        assert_eq!(
            resolved.config.analysis.tool_path,
            Some(PathBuf::from("/opt/diag/tool"))
        );
        assert_eq!(resolved.env_overrides.len(), 3);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zero.json");
        let body = r#"{"schema_version":"1.0.0","analysis":{"poll_interval_ms":0}}"#;
        std::fs::write(&path, body).unwrap();
        let options = ConfigOptions {
            config_path: Some(path),
            config_dir: None,
        };
        let err = load_config_with(&options, env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn snapshot_serializes() {
        let resolved = load_config_with(
            &ConfigOptions {
                config_path: None,
                config_dir: Some(PathBuf::from("/nonexistent-diagkit-dir")),
            },
            env(&[]),
        )
        .unwrap();
        let json = serde_json::to_value(resolved.snapshot()).unwrap();
        assert_eq!(json["config"]["schema_version"], "1.0.0");
        assert_eq!(json["config"]["report"]["query_param"], "file");
    }
}
