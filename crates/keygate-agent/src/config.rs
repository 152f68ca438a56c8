//! Configuration file loading.

use keygate_core::{KeygateConfig, KeygateError, Result};
use std::path::Path;
use tracing::debug;

/// Load configuration from a TOML file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<KeygateConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(KeygateConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        KeygateError::storage(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    let config = parse_config(&contents).map_err(|e| match e {
        KeygateError::Invalid { message } => {
            KeygateError::invalid(format!("{}: {message}", path.display()))
        }
        other => other,
    })?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Parse and validate TOML configuration text.
pub fn parse_config(contents: &str) -> Result<KeygateConfig> {
    let config: KeygateConfig = toml::from_str(contents)
        .map_err(|e| KeygateError::invalid(format!("failed to parse config: {e}")))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_core::SignPolicy;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, KeygateConfig::default());
    }

    #[test]
    fn partial_file_overrides_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keygate.toml");
        std::fs::write(
            &path,
            r#"
[rate_limit]
max_requests = 5

[policy]
default_sign_policy = "basic"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.policy.default_sign_policy, SignPolicy::Basic);
        assert_eq!(config.audit, KeygateConfig::default().audit);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            parse_config("[rate_limit]\nwindow_ms = 0\n"),
            Err(KeygateError::Invalid { .. })
        ));
        assert!(matches!(
            parse_config("[rate_limit]\nwindow_ms = \"soon\"\n"),
            Err(KeygateError::Invalid { .. })
        ));
    }
}
