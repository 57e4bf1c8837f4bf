//! Rolling sample buffer feeding the live connection chart.
//!
//! While a run is active a separate timer copies the current download and
//! upload speeds into a fixed-capacity FIFO. The sampler only reads
//! [`RunState`]; it never influences the run.

pub mod chart;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::clock::{SharedClock, TaskHandle};
use crate::sequencer::RunState;

/// One chart point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub download: f64,
    pub upload: f64,
    pub time: DateTime<Utc>,
}

/// Insertion-ordered queue holding at most `capacity` samples.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleBuffer {
    /// A capacity of zero is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append `sample`, evicting the single oldest entry when over capacity.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// Largest download or upload value currently buffered.
    pub fn max_value(&self) -> Option<f64> {
        self.samples
            .iter()
            .flat_map(|s| [s.download, s.upload])
            .reduce(f64::max)
    }
}

/// Buffer shared between the sampling task and readers.
#[derive(Debug, Clone)]
pub struct SharedBuffer(Arc<Mutex<SampleBuffer>>);

impl SharedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(SampleBuffer::with_capacity(capacity))))
    }

    pub fn lock(&self) -> MutexGuard<'_, SampleBuffer> {
        // A poisoned buffer still holds valid samples.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().snapshot()
    }
}

/// Start sampling `state` into `buffer` every `interval`.
///
/// The first sample is taken one interval after the call. The task ends on
/// cancellation or as soon as it observes `is_running == false`; a tick that
/// fires after the run ended is dropped.
pub fn spawn_sampler(
    state: watch::Receiver<RunState>,
    buffer: SharedBuffer,
    interval: Duration,
    clock: SharedClock,
) -> TaskHandle<usize> {
    TaskHandle::spawn("sampler", move |cancel| async move {
        let mut state = state;
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut taken = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() || !state.borrow_and_update().is_running {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if sample_tick(&state, &buffer, clock.as_ref()) {
                        taken += 1;
                    } else {
                        break;
                    }
                }
            }
        }

        debug!(samples = taken, "sampler stopped");
        taken
    })
}

/// Take one sample if a run is active. Returns false when it is not.
pub fn sample_tick(
    state: &watch::Receiver<RunState>,
    buffer: &SharedBuffer,
    clock: &dyn crate::clock::Clock,
) -> bool {
    let (download, upload) = {
        let s = state.borrow();
        if !s.is_running {
            return false;
        }
        (s.download_speed, s.upload_speed)
    };

    let sample = Sample {
        download,
        upload,
        time: clock.now(),
    };
    let mut buf = buffer.lock();
    buf.push(sample);
    trace!(download, upload, len = buf.len(), "sample taken");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;

    fn sample(n: u32) -> Sample {
        Sample {
            download: f64::from(n),
            upload: f64::from(n) / 2.0,
            time: DateTime::<Utc>::from_timestamp(i64::from(n), 0).unwrap(),
        }
    }

    #[test]
    fn test_buffer_keeps_most_recent_in_order() {
        let mut buf = SampleBuffer::with_capacity(20);
        for n in 1..=25 {
            buf.push(sample(n));
            assert!(buf.len() <= 20);
        }
        assert_eq!(buf.len(), 20);
        let snap = buf.snapshot();
        assert_eq!(snap[0], sample(6));
        assert_eq!(snap[19], sample(25));
        assert!(snap.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn test_buffer_under_capacity_keeps_everything() {
        let mut buf = SampleBuffer::with_capacity(5);
        buf.push(sample(1));
        buf.push(sample(2));
        assert_eq!(buf.snapshot(), vec![sample(1), sample(2)]);
        assert_eq!(buf.latest(), Some(&sample(2)));
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let mut buf = SampleBuffer::with_capacity(0);
        assert_eq!(buf.capacity(), 1);
        buf.push(sample(1));
        buf.push(sample(2));
        assert_eq!(buf.snapshot(), vec![sample(2)]);
    }

    #[test]
    fn test_max_value() {
        let mut buf = SampleBuffer::with_capacity(3);
        assert_eq!(buf.max_value(), None);
        buf.push(sample(4));
        buf.push(sample(9));
        assert_eq!(buf.max_value(), Some(9.0));
    }

    #[test]
    fn test_tick_is_noop_when_idle() {
        let (_tx, rx) = watch::channel(RunState::default());
        let buffer = SharedBuffer::new(4);
        let clock = TokioClock::new();
        assert!(!sample_tick(&rx, &buffer, &clock));
        assert!(buffer.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_stops_when_run_ends() {
        let (tx, rx) = watch::channel(RunState::starting());
        tx.send_modify(|s| {
            s.download_speed = 120.0;
            s.upload_speed = 40.0;
        });
        let buffer = SharedBuffer::new(20);
        let handle = spawn_sampler(rx, buffer.clone(), Duration::from_millis(200), Arc::new(TokioClock::new()));

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        tx.send_modify(|s| s.is_running = false);
        let taken = handle.join().await.unwrap();

        assert_eq!(taken, 5);
        let snap = buffer.snapshot();
        assert_eq!(snap.len(), 5);
        assert!(snap.iter().all(|s| s.download == 120.0 && s.upload == 40.0));

        // contents survive teardown
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(buffer.snapshot().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_cancel() {
        let (_tx, rx) = watch::channel(RunState::starting());
        let buffer = SharedBuffer::new(20);
        let handle = spawn_sampler(rx, buffer.clone(), Duration::from_millis(200), Arc::new(TokioClock::new()));

        tokio::time::sleep(Duration::from_millis(450)).await;
        handle.cancel();
        assert_eq!(handle.join().await, Some(2));
        assert_eq!(buffer.snapshot().len(), 2);
    }
}
