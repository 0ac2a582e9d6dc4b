//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

const MAX_BYTES_LIMIT: u64 = 1024 * 1024 * 1024;

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `name` is empty or contains a path separator
    /// - `max_bytes` is 0 or exceeds 1GB
    /// - `timeout_ms` is less than 100ms or exceeds 10 minutes
    /// - `busy_timeout_ms` is 0
    /// - `user_agent` is empty
    /// - a packaged location has an empty name
    ///
    /// Returns `ConfigError::Missing` if `root` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Missing { field: "root".into(), hint: "Set HOARD_ROOT environment variable".into() });
        }

        if self.name.is_empty() {
            return Err(ConfigError::Invalid { field: "name".into(), reason: "must not be empty".into() });
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(ConfigError::Invalid { field: "name".into(), reason: "must be a single path component".into() });
        }

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_bytes > MAX_BYTES_LIMIT {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must not exceed 1GB".into() });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 600_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 10 minutes (600000ms)".into(),
            });
        }

        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid { field: "busy_timeout_ms".into(), reason: "must be greater than 0".into() });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.packaged_locations.iter().any(|location| location.name.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "packaged_locations".into(),
                reason: "every location needs a name".into(),
            });
        }

        if self.root.is_relative() {
            tracing::warn!(
                root = %self.root.display(),
                "Cache root is relative; it will be resolved against the working directory"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::projector::PackagedLocation;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_root() {
        let config = AppConfig { root: PathBuf::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Missing { field, .. }) if field == "root"));
    }

    #[test]
    fn test_validate_name_with_separator() {
        let config = AppConfig { name: "a/b".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "name"));
    }

    #[test]
    fn test_validate_max_bytes_zero() {
        let config = AppConfig { max_bytes: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_max_bytes_exceeds_limit() {
        let config = AppConfig { max_bytes: MAX_BYTES_LIMIT + 1, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 600_001, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_busy_timeout_zero() {
        let config = AppConfig { busy_timeout_ms: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "busy_timeout_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_unnamed_packaged_location() {
        let location = PackagedLocation { name: String::new(), path: PathBuf::from("/tmp") };
        let config = AppConfig { packaged_locations: vec![location], ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "packaged_locations"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { max_bytes: 1, timeout_ms: 100, busy_timeout_ms: 1, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
