//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`GovernorConfig`], and run
//! validation before returning.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message

use std::path::Path;

use super::validation::{self, ConfigError};
use super::GovernorConfig;

/// Load a [`GovernorConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_file(path: &Path) -> Result<GovernorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`GovernorConfig`] from a TOML string. `source_name` labels
/// errors.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<GovernorConfig, ConfigError> {
    let config: GovernorConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[sandbox]
max_sample_size = 500
sample_timeout_ms = 2000

[impact]
max_reliability_drop_pp = 3.0

[velocity]
window_days = 14

[gate]
max_capability_gain_per_day = 8.0
require_human_approval = false

[observability]
log_format = "json"
"#;

    #[test]
    fn test_load_from_str_valid() {
        let cfg = load_from_str(VALID_TOML, "inline").unwrap();
        assert_eq!(cfg.sandbox.max_sample_size, 500);
        assert_eq!(cfg.impact.max_reliability_drop_pp, 3.0);
        assert_eq!(cfg.velocity.window_days, 14);
        assert_eq!(cfg.gate.max_capability_gain_per_day, 8.0);
        assert!(!cfg.gate.require_human_approval);
    }

    #[test]
    fn test_load_from_str_malformed_is_parse_error() {
        let err = load_from_str("[gate\nmax = ", "broken.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref file, .. } if file == "broken.toml"));
    }

    #[test]
    fn test_load_from_str_wrong_type_is_parse_error() {
        let err = load_from_str("[gate]\nenforce_gates = \"yes\"\n", "typed.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_str_invalid_is_validation_error() {
        let err = load_from_str("[gate]\nmax_capability_gain_per_day = 0.0\n", "zero.toml").unwrap_err();
        match err {
            ConfigError::Validation(msg) => assert!(msg.contains("gate.max_capability_gain_per_day")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file_valid() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(VALID_TOML.as_bytes()).unwrap();
        let cfg = load_from_file(f.path()).unwrap();
        assert_eq!(cfg.velocity.window_days, 14);
    }

    #[test]
    fn test_load_from_file_missing_is_io_error() {
        let err = load_from_file(Path::new("/definitely/not/here/governor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("governor.toml"));
    }
}
