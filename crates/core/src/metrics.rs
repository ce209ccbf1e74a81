//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Transcoder lifecycle (starts, exits, running processes, duration)
//! - Start admission (rejections by reason)
//! - Errors reported to clients, by kind

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Transcoder Metrics
// =============================================================================

/// ffmpeg processes spawned.
pub static TRANSCODES_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "relay_transcodes_started_total",
        "Total ffmpeg processes spawned",
    )
    .unwrap()
});

/// ffmpeg processes currently alive.
pub static TRANSCODES_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "relay_transcodes_running",
        "Number of ffmpeg processes currently alive",
    )
    .unwrap()
});

/// ffmpeg exits by how they ended.
pub static TRANSCODE_EXITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relay_transcode_exits_total", "ffmpeg process exits"),
        &["reason"], // "requested", "unexpected"
    )
    .unwrap()
});

/// Lifetime of a transcode in seconds.
pub static TRANSCODE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "relay_transcode_duration_seconds",
            "Lifetime of an ffmpeg process",
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0]),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Admission & Error Metrics
// =============================================================================

/// Start attempts refused before a process was spawned.
pub static START_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "relay_start_rejections_total",
            "Start attempts refused before spawning ffmpeg",
        ),
        &["reason"], // "limit", "hook", "destination", "invalid_parameters"
    )
    .unwrap()
});

/// Errors surfaced on connections, by kind.
pub static CONNECTION_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relay_connection_errors_total", "Errors surfaced to clients"),
        &["kind"],
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TRANSCODES_STARTED.clone()),
        Box::new(TRANSCODES_RUNNING.clone()),
        Box::new(TRANSCODE_EXITS.clone()),
        Box::new(TRANSCODE_DURATION.clone()),
        Box::new(START_REJECTIONS.clone()),
        Box::new(CONNECTION_ERRORS.clone()),
    ]
}
