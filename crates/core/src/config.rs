use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::meter;
use crate::store::MIN_DURATION_SECS;
use crate::time::{DEFAULT_BPM, DEFAULT_ZOOM};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub bpm: f64,
    /// Pixels per second.
    pub zoom: f64,
    pub loop_enabled: bool,
    pub snap_to_grid: bool,
    pub default_volume: f32,
    pub min_duration_secs: f64,
    /// How far ahead of the loop end the next pass is scheduled.
    pub loop_lookahead_secs: f64,
    /// How long the previous pass keeps sounding after the wrap.
    pub loop_overlap_secs: f64,
    pub meter_every_ticks: u32,
    pub meter_headroom: f32,
    pub tick_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            zoom: DEFAULT_ZOOM,
            loop_enabled: true,
            snap_to_grid: true,
            default_volume: seq_transport::DEFAULT_VOLUME,
            min_duration_secs: MIN_DURATION_SECS,
            loop_lookahead_secs: 0.1,
            loop_overlap_secs: 0.1,
            meter_every_ticks: meter::DEFAULT_EVERY,
            meter_headroom: meter::DEFAULT_HEADROOM,
            tick_interval_ms: 16,
        }
    }
}

impl SessionConfig {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("seq").join("config.toml"))
    }

    /// Load from the user config directory. A missing or unreadable file yields defaults.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::from_path(&path) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), "ignoring config: {err:#}");
                Self::default()
            }
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = SessionConfig::from_toml("bpm = 96.0\nloop_enabled = false\n").unwrap();
        assert_eq!(config.bpm, 96.0);
        assert!(!config.loop_enabled);
        assert_eq!(config.zoom, 50.0);
        assert_eq!(config.meter_every_ticks, 3);
        assert_eq!(config.default_volume, 0.8);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(SessionConfig::from_toml("bpm = \"fast\"").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = SessionConfig {
            bpm: 120.0,
            snap_to_grid: false,
            ..SessionConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::from_path(&path).unwrap(), config);
    }
}
