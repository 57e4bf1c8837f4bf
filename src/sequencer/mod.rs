//! Phase sequencer: drives a run through ping, download and upload.
//!
//! A run is a chain of sleep-then-update steps. Progress is split across the
//! phases (ping 0-25, download 25-75, upload 75-100) and only ever moves
//! forward. The sequencer is the only writer of [`RunState`]; everyone else
//! reads it through a `watch` receiver.

pub mod metrics;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{PhaseTiming, SequencerConfig};
use self::metrics::MetricSource;

/// One stage of a speed test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Ping,
    Download,
    Upload,
    Complete,
}

impl Phase {
    /// Status line shown under the speed meter.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "Initializing",
            Phase::Ping => "Testing Latency",
            Phase::Download => "Download Test",
            Phase::Upload => "Upload Test",
            Phase::Complete => "Complete",
        }
    }

    /// True for the phases that step while a run is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Ping | Phase::Download | Phase::Upload)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Ping => write!(f, "ping"),
            Phase::Download => write!(f, "download"),
            Phase::Upload => write!(f, "upload"),
            Phase::Complete => write!(f, "complete"),
        }
    }
}

/// Live state of the current (or last) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub phase: Phase,
    /// Percent complete, `0..=100`.
    pub progress: f64,
    pub ping: f64,
    pub jitter: f64,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub is_running: bool,
}

impl RunState {
    /// Fresh state for a run that is about to begin.
    pub fn starting() -> Self {
        Self {
            phase: Phase::Ping,
            is_running: true,
            ..Self::default()
        }
    }

    /// Whether the ping phase has produced a reading yet.
    pub fn has_latency(&self) -> bool {
        self.ping > 0.0
    }
}

/// Notable transitions, published for observers that must not miss any.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseChanged { phase: Phase },
    Completed { state: RunState, elapsed_ms: u64 },
    Stopped { phase: Phase },
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { state: RunState, elapsed: Duration },
    Stopped { state: RunState },
}

/// Cadence and progress share of one phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub phase: Phase,
    pub steps: u32,
    pub delay: Duration,
    pub progress_from: f64,
    pub progress_to: f64,
}

impl Stage {
    fn new(phase: Phase, timing: PhaseTiming, progress_from: f64, progress_to: f64) -> Self {
        Self {
            phase,
            steps: timing.steps.max(1),
            delay: timing.delay(),
            progress_from,
            progress_to,
        }
    }

    /// Progress after `step` (1-based) steps of this stage.
    pub fn progress_at(&self, step: u32) -> f64 {
        let step = step.min(self.steps);
        self.progress_from + (self.progress_to - self.progress_from) * f64::from(step) / f64::from(self.steps)
    }

    pub fn duration(&self) -> Duration {
        self.delay * self.steps
    }
}

/// The fixed ping -> download -> upload plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlan {
    stages: [Stage; 3],
}

impl PhasePlan {
    pub fn from_config(cfg: &SequencerConfig) -> Self {
        Self {
            stages: [
                Stage::new(Phase::Ping, cfg.ping, 0.0, 25.0),
                Stage::new(Phase::Download, cfg.download, 25.0, 75.0),
                Stage::new(Phase::Upload, cfg.upload, 75.0, 100.0),
            ],
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wall time of an uninterrupted run.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(Stage::duration).sum()
    }
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self::from_config(&SequencerConfig::default())
    }
}

/// Step a run to completion, or until `cancel` fires.
///
/// The caller has already put `state` into [`RunState::starting`]. Cancellation
/// is observed only while waiting for the next step; a stopped run keeps the
/// phase it was in.
pub async fn run_sequence(
    plan: &PhasePlan,
    state: &watch::Sender<RunState>,
    metrics: &mut dyn MetricSource,
    events: &broadcast::Sender<RunEvent>,
    cancel: &CancellationToken,
) -> RunOutcome {
    let started = tokio::time::Instant::now();

    for stage in plan.stages() {
        state.send_modify(|s| s.phase = stage.phase);
        let _ = events.send(RunEvent::PhaseChanged { phase: stage.phase });
        info!(phase = %stage.phase, steps = stage.steps, delay_ms = stage.delay.as_millis() as u64, "phase started");

        for step in 1..=stage.steps {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    state.send_modify(|s| s.is_running = false);
                    let stopped = state.borrow().clone();
                    info!(phase = %stopped.phase, progress = stopped.progress, "run stopped");
                    let _ = events.send(RunEvent::Stopped { phase: stopped.phase });
                    return RunOutcome::Stopped { state: stopped };
                }
                _ = tokio::time::sleep(stage.delay) => {}
            }

            let progress = stage.progress_at(step);
            match stage.phase {
                Phase::Ping => {
                    let (ping, jitter) = (metrics.ping(), metrics.jitter());
                    state.send_modify(|s| {
                        s.ping = ping;
                        s.jitter = jitter;
                        advance(s, progress);
                    });
                }
                Phase::Download => {
                    let down = metrics.download();
                    state.send_modify(|s| {
                        s.download_speed = down;
                        advance(s, progress);
                    });
                }
                Phase::Upload => {
                    let up = metrics.upload();
                    state.send_modify(|s| {
                        s.upload_speed = up;
                        advance(s, progress);
                    });
                }
                Phase::Idle | Phase::Complete => {}
            }
        }
        debug!(phase = %stage.phase, "phase finished");
    }

    state.send_modify(|s| {
        s.phase = Phase::Complete;
        s.progress = 100.0;
        s.is_running = false;
    });
    let elapsed = started.elapsed();
    let finished = state.borrow().clone();
    info!(
        download = finished.download_speed,
        upload = finished.upload_speed,
        ping = finished.ping,
        jitter = finished.jitter,
        elapsed_ms = elapsed.as_millis() as u64,
        "run complete"
    );
    let _ = events.send(RunEvent::Completed {
        state: finished.clone(),
        elapsed_ms: elapsed.as_millis() as u64,
    });

    RunOutcome::Completed {
        state: finished,
        elapsed,
    }
}

fn advance(state: &mut RunState, progress: f64) {
    state.progress = state.progress.max(progress).clamp(0.0, 100.0);
}
