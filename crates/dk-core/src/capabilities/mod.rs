//! Environment capability detection.
//!
//! - Platform information
//! - procfs availability for live stack capture
//! - Analysis tool resolution
//! - Hosting-platform site scoping detection

mod detect;

pub use detect::{
    detect_capabilities, resolve_site_scoping, resolve_tool, Capabilities, DetectionError,
    EnvSiteScopeDetector, FixedSiteScope, PlatformInfo, SiteScopeDetector, SiteScoping,
    ToolCapability, HOST_SCOPED_STORAGE_ENV,
};
