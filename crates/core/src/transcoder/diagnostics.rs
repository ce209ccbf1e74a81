//! Classification of ffmpeg diagnostic output.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static CONNECTION_REFUSED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(.*): Connection refused").expect("valid regex"));

static FRAME_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"frame=\s*(\d+)(?:\s|$)").expect("valid regex"));

/// What a single line of ffmpeg output means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The RTMP destination refused the connection.
    ConnectionRefused,
    /// A progress line reporting the number of frames encoded so far.
    Progress { frames: u64 },
    /// Anything else.
    Other,
}

/// Classifies one line. Connection failures take precedence over progress.
pub fn classify(line: &str) -> Diagnostic {
    if CONNECTION_REFUSED.is_match(line) {
        return Diagnostic::ConnectionRefused;
    }

    if let Some(frames) = FRAME_PROGRESS
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
    {
        return Diagnostic::Progress { frames };
    }

    Diagnostic::Other
}

/// Splits a byte stream into lines on `\n` or `\r`.
///
/// ffmpeg redraws its progress line with carriage returns, so a plain
/// newline reader would accumulate the whole session into one line.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every complete, non-blank line it closed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}
