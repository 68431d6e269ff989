//! Runtime tunables.
//!
//! A [`Config`] can be loaded from a TOML file or built in code; the scene
//! takes one at construction. A few knobs govern process-wide caches and are
//! applied through [`Config::apply_global`].

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Days a peakfile survives in the cache without an mtime bump.
static PEAK_CACHE_EXPIRY_DAYS: AtomicU64 = AtomicU64::new(90);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default transition length in milliseconds.
    pub animation_duration_ms: u64,
    /// Whether property changes animate at all.
    pub animations_enabled: bool,
    /// Audio block cache budget, counted in 16-bit samples.
    pub audio_cache_samples: usize,
    /// Hard ceiling on the number of pooled GPU textures per table.
    pub texture_cache_max: usize,
    /// Days a peakfile survives in the cache without an mtime bump.
    pub peak_cache_expiry_days: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            animation_duration_ms: 300,
            animations_enabled: true,
            audio_cache_samples: 1 << 23,
            texture_cache_max: 1024,
            peak_cache_expiry_days: 90,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Push the knobs that live outside the scene into the process-wide
    /// caches. Called by `Scene::with_config`.
    pub fn apply_global(&self) {
        crate::waveform::audio::audio_cache().set_budget(self.audio_cache_samples);
        PEAK_CACHE_EXPIRY_DAYS.store(self.peak_cache_expiry_days, Ordering::Relaxed);
    }
}

pub(crate) fn peak_cache_expiry_days() -> u64 {
    PEAK_CACHE_EXPIRY_DAYS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_spec_values() {
        let config = Config::default();
        assert_eq!(config.animation_duration_ms, 300);
        assert_eq!(config.audio_cache_samples, 1 << 23);
        assert_eq!(config.texture_cache_max, 1024);
        assert_eq!(config.peak_cache_expiry_days, 90);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wavetile.toml");
        std::fs::write(&path, "animation_duration_ms = 120\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.animation_duration_ms, 120);
        assert!(config.animations_enabled);
        assert_eq!(config.texture_cache_max, 1024);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wavetile.toml");
        std::fs::write(&path, "animation_duration_ms = [\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
