use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::transcoder::TranscoderConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub client_logs: ClientLogsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed to open the WebSocket. Empty means any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    1234
}

/// Authentication configuration for the operator API
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    /// API key (required when method = "api_key")
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    ApiKey,
}

/// Server-imposed resource limits
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Maximum number of transcodes running at once across all connections.
    /// Unlimited when absent.
    #[serde(default)]
    pub max_concurrent_transcodes: Option<usize>,
}

/// Start-time policy applied to every session configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Regular expression the destination URL must match. Unrestricted when absent.
    #[serde(default)]
    pub rtmp_url_pattern: Option<String>,
    /// Destination URL template with `{name}` placeholders filled from the
    /// WebSocket query string. When set, it replaces the client's destination.
    #[serde(default)]
    pub rtmp_url_template: Option<String>,
}

/// What the client is allowed to see
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientLogsConfig {
    /// Forward error messages and details to the client.
    #[serde(default)]
    pub send_error_details: bool,
    /// Forward raw ffmpeg output lines to the client.
    #[serde(default)]
    pub send_ffmpeg_output: bool,
}

/// Operator-side logging
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Minimum severity (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub auth: SanitizedAuthConfig,
    pub transcoder: TranscoderConfig,
    pub limits: LimitsConfig,
    pub policy: SanitizedPolicyConfig,
    pub client_logs: ClientLogsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
}

/// Sanitized policy (the template may embed stream keys)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedPolicyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtmp_url_pattern: Option<String>,
    pub rtmp_url_template_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            auth: SanitizedAuthConfig {
                method: match config.auth.method {
                    AuthMethod::None => "none".to_string(),
                    AuthMethod::ApiKey => "api_key".to_string(),
                },
                api_key_configured: config
                    .auth
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
            },
            transcoder: config.transcoder.clone(),
            limits: config.limits.clone(),
            policy: SanitizedPolicyConfig {
                rtmp_url_pattern: config.policy.rtmp_url_pattern.clone(),
                rtmp_url_template_configured: config.policy.rtmp_url_template.is_some(),
            },
            client_logs: config.client_logs.clone(),
            logging: config.logging.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000
cors_allowed_origins = ["https://studio.example.com"]

[auth]
method = "api_key"
api_key = "secret"

[transcoder]
ffmpeg_path = "/usr/local/bin/ffmpeg"
global_args = ["-hide_banner"]

[limits]
max_concurrent_transcodes = 3

[policy]
rtmp_url_pattern = "^rtmp://"

[client_logs]
send_error_details = true
send_ffmpeg_output = true

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cors_allowed_origins.len(), 1);
        assert_eq!(config.auth.method, AuthMethod::ApiKey);
        assert_eq!(
            config.transcoder.ffmpeg_path.to_str().unwrap(),
            "/usr/local/bin/ffmpeg"
        );
        assert_eq!(config.transcoder.global_args, vec!["-hide_banner"]);
        assert_eq!(config.limits.max_concurrent_transcodes, Some(3));
        assert_eq!(config.policy.rtmp_url_pattern.as_deref(), Some("^rtmp://"));
        assert!(config.client_logs.send_error_details);
        assert!(config.client_logs.send_ffmpeg_output);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.auth.method, AuthMethod::None);
        assert!(config.limits.max_concurrent_transcodes.is_none());
        assert!(config.policy.rtmp_url_pattern.is_none());
        assert!(!config.client_logs.send_error_details);
        assert!(!config.client_logs.send_ffmpeg_output);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config = Config::default();
        config.auth = AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some("secret-key".to_string()),
        };
        config.policy.rtmp_url_template = Some("rtmp://ingest/live/{key}?auth=hunter2".to_string());

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.auth.method, "api_key");
        assert!(sanitized.auth.api_key_configured);
        assert!(sanitized.policy.rtmp_url_template_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-key"));
        assert!(!json.contains("hunter2"));
    }
}
