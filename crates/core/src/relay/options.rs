use std::sync::Arc;

use regex_lite::Regex;

use super::hook::{StartHook, TemplateRewrite};
use crate::config::{Config, ConfigError};
use crate::transcoder::TranscoderConfig;

/// Runtime settings of a [`RelayServer`](super::RelayServer).
#[derive(Clone, Default)]
pub struct RelayOptions {
    pub transcoder: TranscoderConfig,
    /// Unlimited when `None`.
    pub max_concurrent_transcodes: Option<usize>,
    /// Destinations must match this pattern, when set.
    pub rtmp_url_pattern: Option<Regex>,
    pub start_hook: Option<Arc<dyn StartHook>>,
    /// Send error messages and details to clients.
    pub send_error_details: bool,
    /// Forward ffmpeg output lines to clients.
    pub send_ffmpeg_output: bool,
}

impl RelayOptions {
    pub fn new(transcoder: TranscoderConfig) -> Self {
        Self {
            transcoder,
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let rtmp_url_pattern = config
            .policy
            .rtmp_url_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| {
                ConfigError::ValidationError(format!("policy.rtmp_url_pattern is invalid: {}", e))
            })?;

        let start_hook = config
            .policy
            .rtmp_url_template
            .as_deref()
            .map(TemplateRewrite::parse)
            .transpose()
            .map_err(|e| {
                ConfigError::ValidationError(format!("policy.rtmp_url_template is invalid: {}", e))
            })?
            .map(|template| Arc::new(template) as Arc<dyn StartHook>);

        Ok(Self {
            transcoder: config.transcoder.clone(),
            max_concurrent_transcodes: config.limits.max_concurrent_transcodes,
            rtmp_url_pattern,
            start_hook,
            send_error_details: config.client_logs.send_error_details,
            send_ffmpeg_output: config.client_logs.send_ffmpeg_output,
        })
    }

    pub fn with_max_concurrent_transcodes(mut self, limit: usize) -> Self {
        self.max_concurrent_transcodes = Some(limit);
        self
    }

    pub fn with_rtmp_url_pattern(mut self, pattern: Regex) -> Self {
        self.rtmp_url_pattern = Some(pattern);
        self
    }

    pub fn with_start_hook(mut self, hook: Arc<dyn StartHook>) -> Self {
        self.start_hook = Some(hook);
        self
    }

    pub fn with_error_details(mut self, enabled: bool) -> Self {
        self.send_error_details = enabled;
        self
    }

    pub fn with_ffmpeg_output(mut self, enabled: bool) -> Self {
        self.send_ffmpeg_output = enabled;
        self
    }
}
