//! Time source and cancellable background tasks.
//!
//! Both timer loops (phase stepping and chart sampling) sleep through
//! `tokio::time`, so tests drive them with a paused runtime instead of real
//! wall-clock waits. Timestamps come from a [`Clock`] so they follow the same
//! virtual time.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Source of sample and result timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall time anchored once, then advanced by the tokio clock.
///
/// Under `tokio::time::pause()` the returned timestamps only move when the
/// runtime's virtual clock does.
#[derive(Debug, Clone)]
pub struct TokioClock {
    wall_anchor: DateTime<Utc>,
    instant_anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(wall_anchor: DateTime<Utc>) -> Self {
        Self {
            wall_anchor,
            instant_anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.instant_anchor);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero());
        self.wall_anchor + elapsed
    }
}

/// Handle to a spawned loop that can be cancelled at its next suspension point.
///
/// Dropping the handle leaves the task running; call [`TaskHandle::cancel`]
/// to stop it.
#[derive(Debug)]
pub struct TaskHandle<T> {
    name: &'static str,
    cancel: CancellationToken,
    join: JoinHandle<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Spawn `make(token)` on the current runtime.
    pub fn spawn<F, Fut>(name: &'static str, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(make(cancel.clone()));
        tracing::trace!(task = name, "spawned");
        Self { name, cancel, join }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cancel(&self) {
        tracing::debug!(task = self.name, "cancellation requested");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task's output. A panicked task yields `None`.
    pub async fn join(self) -> Option<T> {
        match self.join.await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(task = self.name, error = %e, "task did not finish cleanly");
                None
            }
        }
    }
}
