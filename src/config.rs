//! TOML configuration for speedboard.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a working dashboard. The config file path can be overridden
//! with the `SPEEDBOARD_CONFIG` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SPEEDBOARD_CONFIG";

/// File looked up in the working directory when no override is set.
pub const LOCAL_CONFIG_FILE: &str = "speedboard.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the dashboard process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in `SPEEDBOARD_CONFIG`.
    /// 2. `speedboard.toml` in the working directory.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SPEEDBOARD_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject values that would stall or divide by zero at runtime.
    pub fn validate(&self) -> Result<()> {
        for (name, phase) in [
            ("ping", &self.sequencer.ping),
            ("download", &self.sequencer.download),
            ("upload", &self.sequencer.upload),
        ] {
            if phase.steps == 0 {
                anyhow::bail!("sequencer.{name}.steps must be at least 1");
            }
        }
        if self.sampler.capacity == 0 {
            anyhow::bail!("sampler.capacity must be at least 1");
        }
        if self.sampler.interval_ms == 0 {
            anyhow::bail!("sampler.interval_ms must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener and storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the dashboard API.
    pub bind: String,
    /// SQLite database holding accounts and saved results.
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            db_path: PathBuf::from("data/speedboard.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Step count and per-step delay of a single test phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub steps: u32,
    pub delay_ms: u64,
}

impl PhaseTiming {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Cadence of the ping / download / upload phases.
///
/// Each phase may set only `steps` or only `delay_ms`; the other field keeps
/// that phase's default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SequencerOverrides")]
pub struct SequencerConfig {
    pub ping: PhaseTiming,
    pub download: PhaseTiming,
    pub upload: PhaseTiming,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SequencerOverrides {
    ping: TimingOverride,
    download: TimingOverride,
    upload: TimingOverride,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimingOverride {
    steps: Option<u32>,
    delay_ms: Option<u64>,
}

impl TimingOverride {
    fn over(self, base: PhaseTiming) -> PhaseTiming {
        PhaseTiming {
            steps: self.steps.unwrap_or(base.steps),
            delay_ms: self.delay_ms.unwrap_or(base.delay_ms),
        }
    }
}

impl From<SequencerOverrides> for SequencerConfig {
    fn from(o: SequencerOverrides) -> Self {
        let base = Self::default();
        Self {
            ping: o.ping.over(base.ping),
            download: o.download.over(base.download),
            upload: o.upload.over(base.upload),
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            ping: PhaseTiming { steps: 50, delay_ms: 30 },
            download: PhaseTiming { steps: 100, delay_ms: 80 },
            upload: PhaseTiming { steps: 100, delay_ms: 70 },
        }
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Rolling chart buffer size and sampling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Maximum number of samples retained for the chart.
    pub capacity: usize,
    /// Milliseconds between two samples while a run is active.
    pub interval_ms: u64,
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            interval_ms: 200,
        }
    }
}

// ---------------------------------------------------------------------------
// Network metadata
// ---------------------------------------------------------------------------

/// IP / ISP / location lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// When false, the dashboard shows placeholders without any lookup.
    pub enabled: bool,
    /// JSON endpoint returning `ip`, `org`, `city` and `country_name`.
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://ipapi.co/json/".to_string(),
            timeout_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Values stamped onto every saved result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    pub server_location: String,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            server_location: "San Francisco, CA".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
