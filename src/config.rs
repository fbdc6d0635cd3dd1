// Configuration management for Etude

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PracticeError, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timing tolerances and look-ahead for the matcher
    pub matching: MatchSettings,

    /// Substring of the MIDI input port name to practice with.
    /// When unset, the first available port is used.
    pub input_port: Option<String>,

    /// Interval of the miss sweep in milliseconds
    pub sweep_interval_ms: u64,

    /// How often the input port is probed for disconnection, in milliseconds
    pub health_check_interval_ms: u64,

    /// Only take score notes from this MIDI channel (0-15)
    pub score_channel: Option<u8>,

    /// Where practice reports are written (none = don't archive)
    pub report_dir: Option<PathBuf>,
}

/// Matcher settings as stored on disk.
///
/// Values are signed so that a hand-edited negative tolerance is reported
/// as an error instead of failing to deserialize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchSettings {
    /// How early (ms) a key press may come and still count
    pub early_ms: i64,

    /// How late (ms) a key press may come and still count
    pub late_ms: i64,

    /// Number of upcoming expected notes eligible for matching
    pub lookahead: i64,

    /// Hits within this many ms of the expected time count as on time
    pub on_time_ms: i64,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            early_ms: 120,
            late_ms: 150,
            lookahead: 8,
            on_time_ms: 40,
        }
    }
}

/// Validated matcher parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchParams {
    pub early: Duration,
    pub late: Duration,
    pub lookahead: usize,
    pub on_time: Duration,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            early: Duration::from_millis(120),
            late: Duration::from_millis(150),
            lookahead: 8,
            on_time: Duration::from_millis(40),
        }
    }
}

impl MatchSettings {
    /// Check ranges and convert to the matcher's parameter set
    pub fn validate(&self) -> Result<MatchParams> {
        if self.early_ms < 0 {
            return Err(PracticeError::InvalidConfig(format!(
                "early tolerance must be >= 0 ms, got {}",
                self.early_ms
            )));
        }
        if self.late_ms < 0 {
            return Err(PracticeError::InvalidConfig(format!(
                "late tolerance must be >= 0 ms, got {}",
                self.late_ms
            )));
        }
        if self.lookahead < 1 {
            return Err(PracticeError::InvalidConfig(format!(
                "look-ahead must be at least 1 note, got {}",
                self.lookahead
            )));
        }
        if self.on_time_ms < 0 {
            return Err(PracticeError::InvalidConfig(format!(
                "on-time threshold must be >= 0 ms, got {}",
                self.on_time_ms
            )));
        }

        Ok(MatchParams {
            early: Duration::from_millis(self.early_ms as u64),
            late: Duration::from_millis(self.late_ms as u64),
            lookahead: self.lookahead as usize,
            on_time: Duration::from_millis(self.on_time_ms as u64),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            matching: MatchSettings::default(),
            input_port: None,
            sweep_interval_ms: 20,
            health_check_interval_ms: 1000,
            score_channel: None,
            report_dir: None,
        }
    }
}

impl Config {
    /// Load config from disk, failing on unreadable or malformed files
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| PracticeError::ConfigFormat(e.to_string()))
    }

    /// Load config from disk or return default
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| PracticeError::ConfigFormat(e.to_string()))?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Validate everything a session needs before it can be created
    pub fn validate(&self) -> Result<MatchParams> {
        if self.sweep_interval_ms == 0 {
            return Err(PracticeError::InvalidConfig(
                "sweep interval must be at least 1 ms".to_string(),
            ));
        }
        if self.health_check_interval_ms == 0 {
            return Err(PracticeError::InvalidConfig(
                "health check interval must be at least 1 ms".to_string(),
            ));
        }
        if let Some(channel) = self.score_channel {
            if channel > 15 {
                return Err(PracticeError::InvalidConfig(format!(
                    "score channel must be 0-15, got {}",
                    channel
                )));
            }
        }
        self.matching.validate()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("etude")
        .join("config.toml")
}
