//! Capability detection implementation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collect::procfs_target::ProcfsTarget;
use crate::config::DiagkitConfig;

/// Environment variable consulted by [`EnvSiteScopeDetector`].
pub const HOST_SCOPED_STORAGE_ENV: &str = "DIAGKIT_HOST_SCOPED_STORAGE";

/// Errors during capability detection.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Whether artifact listings must be restricted to the current site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteScoping {
    Enabled,
    /// The host already isolates storage per site.
    Disabled,
    /// Detection could not tell; treated as enabled.
    Unknown,
}

impl SiteScoping {
    pub fn is_enforced(self) -> bool {
        !matches!(self, SiteScoping::Disabled)
    }
}

/// Hosting-platform check deciding whether site scoping applies.
pub trait SiteScopeDetector {
    fn detect(&self) -> Result<SiteScoping, DetectionError>;
}

/// A detector with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedSiteScope(pub SiteScoping);

impl SiteScopeDetector for FixedSiteScope {
    fn detect(&self) -> Result<SiteScoping, DetectionError> {
        Ok(self.0)
    }
}

/// Reads `DIAGKIT_HOST_SCOPED_STORAGE`: `true` means the host isolates
/// storage (scoping disabled), `false` means scoping is required.
pub struct EnvSiteScopeDetector<F>
where
    F: Fn(&str) -> Option<String>,
{
    lookup: F,
}

impl EnvSiteScopeDetector<fn(&str) -> Option<String>> {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self {
            lookup: |name| std::env::var(name).ok(),
        }
    }
}

impl<F> EnvSiteScopeDetector<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn with_lookup(lookup: F) -> Self {
        Self { lookup }
    }
}

impl<F> SiteScopeDetector for EnvSiteScopeDetector<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn detect(&self) -> Result<SiteScoping, DetectionError> {
        let Some(raw) = (self.lookup)(HOST_SCOPED_STORAGE_ENV) else {
            return Ok(SiteScoping::Unknown);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(SiteScoping::Disabled),
            "0" | "false" | "no" => Ok(SiteScoping::Enabled),
            _ => Err(DetectionError::InvalidValue {
                name: HOST_SCOPED_STORAGE_ENV,
                value: raw,
            }),
        }
    }
}

/// Run `detector`, mapping any failure to [`SiteScoping::Unknown`].
pub fn resolve_site_scoping(detector: &dyn SiteScopeDetector) -> SiteScoping {
    match detector.detect() {
        Ok(scoping) => scoping,
        Err(e) => {
            warn!(error = %e, "site scope detection failed, scoping stays enabled");
            SiteScoping::Unknown
        }
    }
}

/// Platform information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
    /// Kernel release (`uname -r`), when available.
    pub kernel_release: Option<String>,
}

/// Analysis tool availability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCapability {
    pub configured: Option<PathBuf>,
    /// Where the tool resolved to on this host.
    pub resolved: Option<PathBuf>,
    pub available: bool,
}

/// Complete capability snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub platform: PlatformInfo,
    /// Live stack capture through procfs is possible.
    pub procfs: bool,
    pub analysis_tool: ToolCapability,
    pub site_scoping: SiteScoping,
    pub site_name: Option<String>,
    pub detected_at: String,
}

impl Capabilities {
    pub fn can_capture_stacks(&self) -> bool {
        self.procfs
    }

    pub fn can_analyze(&self) -> bool {
        self.analysis_tool.available
    }

    /// One-line summary for the `summary` output format.
    pub fn summary(&self) -> String {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        let scoping = if self.site_scoping.is_enforced() {
            "enforced"
        } else {
            "off"
        };
        format!(
            "{}/{} procfs={} analysis_tool={} site_scoping={}",
            self.platform.os,
            self.platform.arch,
            yes_no(self.can_capture_stacks()),
            yes_no(self.can_analyze()),
            scoping,
        )
    }
}

/// Detect everything `check` reports.
pub fn detect_capabilities(
    config: &DiagkitConfig,
    detector: &dyn SiteScopeDetector,
) -> Capabilities {
    info!("detecting capabilities");

    let platform = detect_platform();
    let procfs = ProcfsTarget::default().is_available();
    let configured = config.analysis.tool_path.clone();
    let resolved = configured.as_deref().and_then(resolve_tool);
    debug!(?configured, ?resolved, "analysis tool lookup");

    let caps = Capabilities {
        platform,
        procfs,
        analysis_tool: ToolCapability {
            available: resolved.is_some(),
            configured,
            resolved,
        },
        site_scoping: resolve_site_scoping(detector),
        site_name: config.inventory.site_name.clone(),
        detected_at: chrono::Utc::now().to_rfc3339(),
    };

    info!(summary = %caps.summary(), "capability detection complete");
    caps
}

fn detect_platform() -> PlatformInfo {
    PlatformInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        kernel_release: detect_kernel_release(),
    }
}

fn detect_kernel_release() -> Option<String> {
    #[cfg(unix)]
    {
        let mut uname = std::mem::MaybeUninit::<libc::utsname>::uninit();
        let result = unsafe { libc::uname(uname.as_mut_ptr()) };
        if result == 0 {
            let uname = unsafe { uname.assume_init() };
            let release = unsafe {
                std::ffi::CStr::from_ptr(uname.release.as_ptr())
                    .to_string_lossy()
                    .to_string()
            };
            return Some(release);
        }
    }
    None
}

/// Resolve a tool path the way process spawning would: paths with a
/// separator are checked directly, bare names are searched on `PATH`.
pub fn resolve_tool(tool: &Path) -> Option<PathBuf> {
    if tool.as_os_str().is_empty() {
        return None;
    }
    if tool.components().count() > 1 || tool.is_absolute() {
        return is_executable(tool).then(|| tool.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.is_file() && meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        meta.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(
        value: Option<&'static str>,
    ) -> EnvSiteScopeDetector<impl Fn(&str) -> Option<String>> {
        EnvSiteScopeDetector::with_lookup(move |name: &str| {
            assert_eq!(name, HOST_SCOPED_STORAGE_ENV);
            value.map(str::to_string)
        })
    }

    #[test]
    fn env_detector_values() {
        assert_eq!(detector(Some("true")).detect().unwrap(), SiteScoping::Disabled);
        assert_eq!(detector(Some("0")).detect().unwrap(), SiteScoping::Enabled);
        assert_eq!(detector(None).detect().unwrap(), SiteScoping::Unknown);
        assert!(detector(Some("maybe")).detect().is_err());
    }

    #[test]
    fn detection_failure_fails_safe() {
        let scoping = resolve_site_scoping(&detector(Some("garbage")));
        assert_eq!(scoping, SiteScoping::Unknown);
        assert!(scoping.is_enforced());
        assert!(!SiteScoping::Disabled.is_enforced());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_tool_checks_exec_bit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("analyzer");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        assert!(resolve_tool(&tool).is_none());
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(resolve_tool(&tool), Some(tool.clone()));
        assert!(resolve_tool(Path::new("")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_bare_name_on_path() {
        assert!(resolve_tool(Path::new("sh")).is_some());
        assert!(resolve_tool(Path::new("definitely-not-a-real-tool-dk")).is_none());
    }

    #[test]
    fn capabilities_reflect_config() {
        let mut config = DiagkitConfig::default();
        config.inventory.site_name = Some("site1".to_string());
        let caps = detect_capabilities(&config, &FixedSiteScope(SiteScoping::Disabled));
        assert!(!caps.can_analyze());
        assert_eq!(caps.site_name.as_deref(), Some("site1"));
        assert!(caps.summary().contains("site_scoping=off"));
    }
}
