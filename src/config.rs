//! Configuration management for timing parameters
//!
//! This module provides runtime configuration loading from JSON files so the
//! scheduler constants (poll interval, lookahead window, spin granularity)
//! and sync margins can be tuned per platform without recompilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub tempo: TempoConfig,
    #[serde(default)]
    pub tap: TapConfig,
}

/// Lookahead scheduler parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the poll loop wakes up to discover due ticks
    pub poll_interval_ms: u64,
    /// Horizon ahead of "now" within which ticks are discovered
    pub lookahead_ms: u64,
    /// Sleep granularity of the busy-wait in the trigger routine
    pub spin_sleep_us: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            lookahead_ms: 100,
            spin_sleep_us: 200,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.lookahead_ms)
    }

    pub fn spin_sleep(&self) -> Duration {
        Duration::from_micros(self.spin_sleep_us.max(1))
    }

    /// The lookahead only absorbs poll jitter if it is wider than the poll interval.
    pub fn is_jitter_safe(&self) -> bool {
        self.lookahead_ms > self.poll_interval_ms
    }
}

/// Cross-device start parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Mute-and-prime lead before the shared start instant
    pub warmup_ms: u64,
    /// Margin added after the next whole second when a master picks a start time
    pub start_margin_secs: f64,
    /// Attempts made to read an absent hardware clock before a start is abandoned
    pub clock_retry_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 250,
            start_margin_secs: 1.0,
            clock_retry_limit: 25,
        }
    }
}

impl SyncConfig {
    pub fn warmup_secs(&self) -> f64 {
        self.warmup_ms as f64 / 1000.0
    }
}

/// Tempo and time signature limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfig {
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub default_bpm: f64,
    pub max_numerator: u32,
    /// Cues triggered while playing wait for the bar boundary
    pub queue_cues: bool,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: 40.0,
            max_bpm: 300.0,
            default_bpm: 120.0,
            max_numerator: 16,
            queue_cues: true,
        }
    }
}

/// Tap tempo estimator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    /// Number of recent intervals averaged
    pub window: usize,
    /// Gap after which a tap starts a fresh sequence
    pub reset_after_secs: f64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            window: 6,
            reset_after_secs: 2.0,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/click_sync.json")
    }
}
