//! Configuration management for metronome defaults
//!
//! This module provides runtime configuration loading from JSON files so the
//! CLI and host bindings can share tempo, meter and scheduling defaults
//! without recompilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::MetronomeError;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub metronome: MetronomeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Construction parameters for a metronome instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    /// Beats per minute
    pub bpm: u32,
    /// Beats per bar; 0 and 1 both mean "single beat, no accent"
    pub time_signature: u32,
    /// Output volume in [0.0, 1.0]
    pub volume: f32,
    /// Sample rate in Hz used for beat length and clock conversion
    pub sample_rate: u32,
    /// Lead-in bars played before tick 0
    pub pre_count_bars: u32,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: 120,
            time_signature: 0,
            volume: 0.5,
            sample_rate: 44_100,
            pre_count_bars: 0,
        }
    }
}

impl MetronomeConfig {
    /// Reject parameters the synthesizer and clock cannot work with.
    pub fn validate(&self) -> Result<(), MetronomeError> {
        if self.bpm == 0 {
            return Err(MetronomeError::InvalidParameter {
                name: "bpm",
                value: self.bpm as i64,
            });
        }
        if self.sample_rate == 0 {
            return Err(MetronomeError::InvalidParameter {
                name: "sample_rate",
                value: self.sample_rate as i64,
            });
        }
        Ok(())
    }
}

/// Source of the periodic wakeup that drives tick emission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeupMode {
    /// Background thread firing every beat
    #[default]
    Thread,
    /// Host calls `poll()` from its own timer (display link, game loop, tests)
    External,
}

/// Scheduler and session-event tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between pausing on a route change and restarting the renderer
    pub route_change_settle_ms: u64,
    pub wakeup: WakeupMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            route_change_settle_ms: 500,
            wakeup: WakeupMode::Thread,
        }
    }
}

impl SchedulerConfig {
    pub fn route_change_settle(&self) -> Duration {
        Duration::from_millis(self.route_change_settle_ms)
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or the defaults if the file is missing or
    /// its JSON is invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    tracing::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.metronome.bpm, 120);
        assert_eq!(config.metronome.time_signature, 0);
        assert_eq!(config.metronome.sample_rate, 44_100);
        assert_eq!(config.metronome.pre_count_bars, 0);
        assert_eq!(config.scheduler.route_change_settle_ms, 500);
        assert_eq!(config.scheduler.wakeup, WakeupMode::Thread);
    }

    #[test]
    fn test_wakeup_mode_json() {
        let parsed: SchedulerConfig = serde_json::from_str(r#"{ "wakeup": "external" }"#).unwrap();
        assert_eq!(parsed.wakeup, WakeupMode::External);
        assert_eq!(parsed.route_change_settle_ms, 500);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "metronome": { "bpm": 90, "time_signature": 3 } }"#)
                .unwrap();

        assert_eq!(parsed.metronome.bpm, 90);
        assert_eq!(parsed.metronome.time_signature, 3);
        assert_eq!(parsed.metronome.sample_rate, 44_100);
        assert_eq!(parsed.scheduler.route_change_settle_ms, 500);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/metronome.json");
        assert_eq!(config.metronome, MetronomeConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_bpm() {
        let config = MetronomeConfig {
            bpm: 0,
            ..MetronomeConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(MetronomeError::InvalidParameter {
                name: "bpm",
                value: 0
            })
        );
        assert!(MetronomeConfig::default().validate().is_ok());
    }
}
