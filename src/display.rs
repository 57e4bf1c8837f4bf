//! Presentation helpers for the stats panel and speed meter.
//!
//! Units only exist here; the run state stores bare numbers.

use serde::Serialize;

use crate::netinfo::PLACEHOLDER;
use crate::sequencer::{Phase, RunState};

/// Full scale of the speed meter gauge, in Mbps.
pub const METER_MAX_MBPS: f64 = 300.0;

/// Tick labels under the gauge.
pub const METER_TICKS: [&str; 5] = ["0", "75", "150", "225", "300+ Mbps"];

/// Format a throughput value, switching to Gbps above 1000 Mbps.
pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Latency text; a placeholder until the ping phase has produced a value.
pub fn format_ping(state: &RunState) -> String {
    if state.has_latency() {
        format!("{:.0} ms", state.ping)
    } else {
        PLACEHOLDER.to_string()
    }
}

pub fn format_jitter(state: &RunState) -> String {
    if state.has_latency() {
        format!("{:.1} ms", state.jitter)
    } else {
        PLACEHOLDER.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PingQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl PingQuality {
    pub fn label(self) -> &'static str {
        match self {
            PingQuality::Excellent => "Excellent",
            PingQuality::Good => "Good",
            PingQuality::Fair => "Fair",
            PingQuality::Poor => "Poor",
        }
    }
}

pub fn ping_quality(ping_ms: f64) -> PingQuality {
    if ping_ms < 20.0 {
        PingQuality::Excellent
    } else if ping_ms < 50.0 {
        PingQuality::Good
    } else if ping_ms < 100.0 {
        PingQuality::Fair
    } else {
        PingQuality::Poor
    }
}

pub fn jitter_stability(jitter_ms: f64) -> &'static str {
    if jitter_ms < 5.0 {
        "Stable"
    } else {
        "Variable"
    }
}

/// Download:upload ratio as `"N.N:1"`. A zero upload gives `"0.0:1"`.
pub fn speed_ratio(download: f64, upload: f64) -> String {
    let ratio = if upload > 0.0 { download / upload } else { 0.0 };
    format!("{ratio:.1}:1")
}

/// Speed meter reading for the active phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterReading {
    pub phase: Phase,
    pub speed: f64,
    /// Gauge fill, `0..=100`.
    pub percent: f64,
    /// Only set while a run is in flight.
    pub status: Option<&'static str>,
}

pub fn meter(state: &RunState) -> MeterReading {
    let speed = match state.phase {
        Phase::Download => state.download_speed,
        Phase::Upload => state.upload_speed,
        _ => 0.0,
    };
    MeterReading {
        phase: state.phase,
        speed,
        percent: (speed / METER_MAX_MBPS * 100.0).clamp(0.0, 100.0),
        status: state.is_running.then(|| state.phase.label()),
    }
}

/// Everything the stats panel renders, pre-formatted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsPanel {
    pub latency: String,
    pub latency_quality: Option<&'static str>,
    pub jitter: String,
    pub jitter_stability: Option<&'static str>,
    pub download: String,
    pub upload: String,
    pub ratio: String,
    pub progress: String,
}

pub fn stats_panel(state: &RunState) -> StatsPanel {
    let has_latency = state.has_latency();
    StatsPanel {
        latency: format_ping(state),
        latency_quality: has_latency.then(|| ping_quality(state.ping).label()),
        jitter: format_jitter(state),
        jitter_stability: has_latency.then(|| jitter_stability(state.jitter)),
        download: format_speed(state.download_speed),
        upload: format_speed(state.upload_speed),
        ratio: speed_ratio(state.download_speed, state.upload_speed),
        progress: format!("{:.0}%", state.progress),
    }
}
