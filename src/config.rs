// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunable thresholds for the rule-based classifier (volts and fractions).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub relaxed_level: f64,
    pub focused_level: f64,
    pub relaxed_fraction: f64,
    pub focused_fraction: f64,
    pub peak_level: f64,
    pub peak_fraction: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            relaxed_level: 1.7,
            focused_level: 1.9,
            relaxed_fraction: 0.10,
            focused_fraction: 0.15,
            peak_level: 2.0,
            peak_fraction: 0.05,
        }
    }
}

/// Runtime configuration handed to each component at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub buffer_capacity: usize,
    pub sampling_rate_hz: f64,
    pub window_seconds: f64,
    pub tick_interval_ms: u64,
    pub stop_join_timeout_ms: u64,
    pub event_channel_capacity: usize,
    pub data_dir: PathBuf,
    pub model_path: PathBuf,
    pub rule_thresholds: RuleThresholds,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/cu.usbmodem214101".to_owned(),
            baud_rate: 9600,
            read_timeout_ms: 1000,
            settle_delay_ms: 2000,
            buffer_capacity: 500,
            sampling_rate_hz: 100.0,
            window_seconds: 3.0,
            tick_interval_ms: 50,
            stop_join_timeout_ms: 2000,
            event_channel_capacity: 4096,
            data_dir: PathBuf::from("data"),
            model_path: PathBuf::from("models/eeg_state_model.json"),
            rule_thresholds: RuleThresholds::default(),
        }
    }
}

impl AppConfig {
    /// Loads a JSON config. A missing file is not an error and yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Number of samples in one classification window.
    pub fn window_samples(&self) -> usize {
        (self.sampling_rate_hz * self.window_seconds).round().max(0.0) as usize
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }
}
