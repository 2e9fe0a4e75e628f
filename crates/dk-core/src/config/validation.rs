//! Semantic validation for `diagkit.json`.
//!
//! Shape is enforced by serde; this checks values that deserialize fine but
//! would make the pipeline misbehave (zero intervals, non-positive ceilings).

use thiserror::Error;

use super::DiagkitConfig;

/// Errors that can occur during semantic validation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("analysis.poll_interval_ms must be positive")]
    ZeroPollInterval,

    #[error("analysis.cpu_ceiling_secs must be positive and finite (got {value})")]
    CpuCeilingRange { value: f64 },

    #[error("analysis.memory_ceiling_bytes must be positive")]
    ZeroMemoryCeiling,

    #[error("stacks.attach_timeout_ms must be positive")]
    ZeroAttachTimeout,

    #[error("stacks.max_threads must be positive")]
    ZeroThreadCap,

    #[error("inventory.page_size must be positive")]
    ZeroPageSize,

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &DiagkitConfig) -> Result<(), ValidationError> {
    let analysis = &config.analysis;
    if analysis.poll_interval_ms == 0 {
        return Err(ValidationError::ZeroPollInterval);
    }
    if !(analysis.cpu_ceiling_secs.is_finite() && analysis.cpu_ceiling_secs > 0.0) {
        return Err(ValidationError::CpuCeilingRange {
            value: analysis.cpu_ceiling_secs,
        });
    }
    if analysis.memory_ceiling_bytes == 0 {
        return Err(ValidationError::ZeroMemoryCeiling);
    }
    if let Some(tool) = &analysis.tool_path {
        if tool.as_os_str().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "analysis.tool_path".to_string(),
                message: "must not be empty".to_string(),
            });
        }
    }

    if config.stacks.attach_timeout_ms == 0 {
        return Err(ValidationError::ZeroAttachTimeout);
    }
    if config.stacks.max_threads == 0 {
        return Err(ValidationError::ZeroThreadCap);
    }
    for frame in config
        .stacks
        .extra_excluded_frames
        .iter()
        .chain(&config.stacks.extra_excluded_substrings)
    {
        if frame.is_empty() {
            // An empty substring would exclude every frame
            return Err(ValidationError::InvalidValue {
                field: "stacks.extra_excluded_*".to_string(),
                message: "exclusion entries must not be empty".to_string(),
            });
        }
    }

    if config.report.query_param.trim().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "report.query_param".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    if !config.report.viewer_path.starts_with('/') {
        return Err(ValidationError::InvalidValue {
            field: "report.viewer_path".to_string(),
            message: format!("must be absolute (got '{}')", config.report.viewer_path),
        });
    }

    if config.inventory.page_size == 0 {
        return Err(ValidationError::ZeroPageSize);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&DiagkitConfig::default()), Ok(()));
    }

    #[test]
    fn rejects_non_positive_cpu_ceiling() {
        let mut config = DiagkitConfig::default();
        config.analysis.cpu_ceiling_secs = 0.0;
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::CpuCeilingRange { .. })
        ));
        config.analysis.cpu_ceiling_secs = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_caps() {
        let mut config = DiagkitConfig::default();
        config.stacks.max_threads = 0;
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::ZeroThreadCap)
        );

        let mut config = DiagkitConfig::default();
        config.analysis.memory_ceiling_bytes = 0;
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::ZeroMemoryCeiling)
        );
    }

    #[test]
    fn rejects_empty_exclusion_entry() {
        let mut config = DiagkitConfig::default();
        config.stacks.extra_excluded_substrings.push(String::new());
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_relative_viewer_path() {
        let mut config = DiagkitConfig::default();
        config.report.viewer_path = "viewer.html".to_string();
        assert!(validate_config(&config).is_err());
    }
}
