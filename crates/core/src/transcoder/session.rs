//! Client-supplied session configuration and the ffmpeg command line built from it.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Parameters describing the transcode a client wants.
///
/// Missing fields deserialize to zero/empty so that [`SessionConfig::validate`]
/// can report every absent field at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub framerate: u32,
    #[serde(default)]
    pub audio_sample_rate: u32,
    /// Destination RTMP URL.
    #[serde(default)]
    pub rtmp: String,
    /// Audio bitrate in bits per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<u32>,
    /// Video bitrate cap in bits per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<u32>,
}

impl SessionConfig {
    pub fn new(framerate: u32, audio_sample_rate: u32, rtmp: impl Into<String>) -> Self {
        Self {
            framerate,
            audio_sample_rate,
            rtmp: rtmp.into(),
            audio_bitrate: None,
            video_bitrate: None,
        }
    }

    /// Checks that every required field is populated, in a fixed order.
    pub fn validate(&self) -> Result<(), RelayError> {
        let mut missing = Vec::new();
        if self.framerate == 0 {
            missing.push("framerate");
        }
        if self.audio_sample_rate == 0 {
            missing.push("audioSampleRate");
        }
        if self.rtmp.trim().is_empty() {
            missing.push("rtmp");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RelayError::InvalidParameters { missing })
        }
    }

    /// Builds the ffmpeg arguments (without global args) for this session.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let keyint_min = self.framerate.min(25);
        let gop = self.framerate.saturating_mul(2);

        let mut args: Vec<String> = [
            "-i", "-", "-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.extend([
            "-r".to_string(),
            self.framerate.to_string(),
            "-g".to_string(),
            gop.to_string(),
            "-keyint_min".to_string(),
            keyint_min.to_string(),
        ]);

        args.extend(
            [
                "-crf", "25", "-pix_fmt", "yuv420p", "-sc_threshold", "0", "-profile:v", "main",
                "-level", "3.1",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        if let Some(bitrate) = self.video_bitrate.filter(|b| *b > 0) {
            let kbps = bitrate / 1000;
            args.extend([
                "-maxrate".to_string(),
                format!("{}k", kbps),
                "-bufsize".to_string(),
                format!("{}k", kbps.saturating_mul(2)),
            ]);
        }

        let audio_bitrate = match self.audio_bitrate.filter(|b| *b > 0) {
            Some(bitrate) => bitrate.to_string(),
            None => AudioPreset::for_sample_rate(self.audio_sample_rate)
                .bitrate()
                .to_string(),
        };

        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            audio_bitrate,
            "-ar".to_string(),
            self.audio_sample_rate.to_string(),
            "-f".to_string(),
            "flv".to_string(),
            self.rtmp.clone(),
        ]);

        args
    }
}

/// Audio encoding presets, bucketed by sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPreset {
    Low,
    Medium,
    High,
}

impl AudioPreset {
    /// Unknown rates, 48000 included, use the 44100 preset.
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        match sample_rate {
            11025 => Self::Low,
            22050 => Self::Medium,
            _ => Self::High,
        }
    }

    pub fn bitrate(&self) -> &'static str {
        match self {
            Self::Low => "11k",
            Self::Medium => "22k",
            Self::High => "44k",
        }
    }
}
