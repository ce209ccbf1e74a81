//! Configuration for the transcoder supervisor.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Operator settings shared by every transcoder a relay starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Arguments placed before the generated ones (e.g. `-hide_banner`).
    #[serde(default)]
    pub global_args: Vec<String>,

    /// How long to wait for ffmpeg's output streams to drain after it exits
    /// before reporting the exit (milliseconds).
    #[serde(default = "default_drain_ms")]
    pub diagnostic_drain_ms: u64,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_drain_ms() -> u64 {
    2000
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            global_args: Vec::new(),
            diagnostic_drain_ms: default_drain_ms(),
        }
    }
}

impl TranscoderConfig {
    /// Creates a config pointing at a custom ffmpeg binary.
    pub fn with_ffmpeg_path(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ..Default::default()
        }
    }

    /// Sets the arguments placed before the generated ones.
    pub fn with_global_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.diagnostic_drain_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TranscoderConfig::default();
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert!(config.global_args.is_empty());
        assert_eq!(config.drain_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_config_builder() {
        let config = TranscoderConfig::with_ffmpeg_path("/bin/sh").with_global_args(["fake.sh"]);
        assert_eq!(config.ffmpeg_path, PathBuf::from("/bin/sh"));
        assert_eq!(config.global_args, vec!["fake.sh".to_string()]);
    }
}
