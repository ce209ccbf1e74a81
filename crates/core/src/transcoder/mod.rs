//! ffmpeg process supervision.
//!
//! A [`Transcoder`] owns one ffmpeg child: it builds the command line from a
//! [`SessionConfig`], pipes client data into stdin, classifies diagnostic
//! output and guarantees the process is gone once destroyed.

mod config;
mod diagnostics;
mod session;
mod slots;
mod supervisor;
mod types;

pub use config::TranscoderConfig;
pub use diagnostics::{classify, Diagnostic, LineSplitter};
pub use session::{AudioPreset, SessionConfig};
pub use slots::{TranscodeSlot, TranscodeSlots};
pub use supervisor::{Transcoder, TranscoderMonitor};
pub use types::{TranscoderEvent, TranscoderEventKind, TranscoderState, TranscoderStatus};
