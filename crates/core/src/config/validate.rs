use std::str::FromStr;

use regex_lite::Regex;

use super::{
    types::{AuthMethod, Config},
    ConfigError,
};
use crate::relay::TemplateRewrite;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - api_key is present when auth method is api_key
/// - max_concurrent_transcodes is not 0
/// - rtmp_url_pattern compiles
/// - rtmp_url_template placeholders are well formed
/// - logging.level is a known severity
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_ref().is_none_or(|k| k.is_empty())
    {
        return Err(ConfigError::ValidationError(
            "auth.api_key must be set when auth.method is api_key".to_string(),
        ));
    }

    if config.limits.max_concurrent_transcodes == Some(0) {
        return Err(ConfigError::ValidationError(
            "limits.max_concurrent_transcodes cannot be 0 (omit it for no limit)".to_string(),
        ));
    }

    if let Some(pattern) = &config.policy.rtmp_url_pattern {
        Regex::new(pattern).map_err(|e| {
            ConfigError::ValidationError(format!("policy.rtmp_url_pattern is invalid: {}", e))
        })?;
    }

    if let Some(template) = &config.policy.rtmp_url_template {
        TemplateRewrite::parse(template).map_err(|e| {
            ConfigError::ValidationError(format!("policy.rtmp_url_template is invalid: {}", e))
        })?;
    }

    if config.transcoder.ffmpeg_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "transcoder.ffmpeg_path cannot be empty".to_string(),
        ));
    }

    tracing::Level::from_str(&config.logging.level).map_err(|_| {
        ConfigError::ValidationError(format!(
            "logging.level '{}' is not one of trace, debug, info, warn, error",
            config.logging.level
        ))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_api_key_required() {
        let mut config = Config::default();
        config.auth = AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: None,
        };
        assert!(validate_config(&config).is_err());

        config.auth.api_key = Some("k".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_limit_fails() {
        let mut config = Config::default();
        config.limits.max_concurrent_transcodes = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bad_pattern_fails() {
        let mut config = Config::default();
        config.policy.rtmp_url_pattern = Some("rtmp://(unclosed".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("rtmp_url_pattern"));
    }

    #[test]
    fn test_validate_bad_template_fails() {
        let mut config = Config::default();
        config.policy.rtmp_url_template = Some("rtmp://ingest/live/{key".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("rtmp_url_template"));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.logging.level = "silly".to_string();
        assert!(validate_config(&config).is_err());

        config.logging.level = "warn".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
