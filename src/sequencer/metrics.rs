//! Simulated readings for each test phase.
//!
//! Values are plain floats; "ms" and "Mbps" only appear when formatting.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;

/// Round-trip latency range in milliseconds.
pub const PING_MS: Range<f64> = 10.0..60.0;
/// Jitter range in milliseconds.
pub const JITTER_MS: Range<f64> = 1.0..6.0;
/// Download base throughput, before noise.
pub const DOWNLOAD_BASE_MBPS: Range<f64> = 70.0..250.0;
/// Multiplicative noise applied to each download reading.
pub const DOWNLOAD_NOISE: Range<f64> = 0.95..1.12;
/// Upload base throughput, before noise.
pub const UPLOAD_BASE_MBPS: Range<f64> = 35.0..105.0;
/// Multiplicative noise applied to each upload reading.
pub const UPLOAD_NOISE: Range<f64> = 0.95..1.10;

/// Produces one reading per sequencer step. Implementations cannot fail.
pub trait MetricSource: Send {
    fn ping(&mut self) -> f64;
    fn jitter(&mut self) -> f64;
    fn download(&mut self) -> f64;
    fn upload(&mut self) -> f64;
}

/// Pseudo-random readings within the documented ranges.
#[derive(Debug)]
pub struct RandomMetrics {
    rng: StdRng,
}

impl RandomMetrics {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence, used by `speedboard run --seed` and tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn noisy(&mut self, base: Range<f64>, noise: Range<f64>) -> f64 {
        let base = self.rng.gen_range(base);
        base * self.rng.gen_range(noise)
    }
}

impl Default for RandomMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for RandomMetrics {
    fn ping(&mut self) -> f64 {
        self.rng.gen_range(PING_MS)
    }

    fn jitter(&mut self) -> f64 {
        self.rng.gen_range(JITTER_MS)
    }

    fn download(&mut self) -> f64 {
        self.noisy(DOWNLOAD_BASE_MBPS, DOWNLOAD_NOISE)
    }

    fn upload(&mut self) -> f64 {
        self.noisy(UPLOAD_BASE_MBPS, UPLOAD_NOISE)
    }
}

/// Constant readings, for offline demos and reproducible checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedMetrics {
    pub ping: f64,
    pub jitter: f64,
    pub download: f64,
    pub upload: f64,
}

impl MetricSource for FixedMetrics {
    fn ping(&mut self) -> f64 {
        self.ping
    }

    fn jitter(&mut self) -> f64 {
        self.jitter
    }

    fn download(&mut self) -> f64 {
        self.download
    }

    fn upload(&mut self) -> f64 {
        self.upload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_readings_stay_in_range() {
        let mut m = RandomMetrics::seeded(7);
        for _ in 0..1_000 {
            let ping = m.ping();
            assert!(PING_MS.contains(&ping), "ping {ping}");
            let jitter = m.jitter();
            assert!(JITTER_MS.contains(&jitter), "jitter {jitter}");

            let down = m.download();
            assert!(down >= 70.0 * 0.95 && down < 250.0 * 1.12, "download {down}");
            let up = m.upload();
            assert!(up >= 35.0 * 0.95 && up < 105.0 * 1.10, "upload {up}");
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = RandomMetrics::seeded(42);
        let mut b = RandomMetrics::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.download(), b.download());
            assert_eq!(a.ping(), b.ping());
        }
    }
}
