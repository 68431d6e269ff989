//! Resolution of the on-disk peak cache directory.
//!
//! The cache root follows the XDG convention: `$XDG_CACHE_HOME` when set,
//! otherwise the platform cache directory (`~/.cache` on Linux). Peak files
//! live in a `peak/` subdirectory which is created on first use. An override
//! hook keeps tests and portable setups away from the real user cache.

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;

use crate::error::WaveformError;

static CACHE_ROOT_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Resolve the cache root (the directory that contains `peak/`).
pub fn cache_root() -> Result<PathBuf, WaveformError> {
    if let Some(path) = CACHE_ROOT_OVERRIDE
        .lock()
        .expect("cache root override mutex poisoned")
        .clone()
    {
        return Ok(path);
    }
    if let Ok(path) = std::env::var("XDG_CACHE_HOME") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    BaseDirs::new()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .ok_or_else(|| WaveformError::NoCacheDir {
            message: "no home directory".into(),
        })
}

/// The peak cache directory, created if missing.
pub fn peak_cache_dir() -> Result<PathBuf, WaveformError> {
    let dir = cache_root()?.join("peak");
    std::fs::create_dir_all(&dir).map_err(|source| WaveformError::io(&dir, &source))?;
    Ok(dir)
}

fn set_override(path: Option<PathBuf>) -> Option<PathBuf> {
    let mut guard = CACHE_ROOT_OVERRIDE
        .lock()
        .expect("cache root override mutex poisoned");
    std::mem::replace(&mut guard, path)
}

/// Guard that points the cache root at a temporary location and restores the
/// previous value on drop. Used by tests and embedders that sandbox the cache.
pub struct CacheRootGuard {
    previous: Option<PathBuf>,
}

impl CacheRootGuard {
    pub fn set(path: PathBuf) -> Self {
        let previous = set_override(Some(path));
        Self { previous }
    }
}

impl Drop for CacheRootGuard {
    fn drop(&mut self) {
        set_override(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn override_wins_and_creates_peak_subdir() {
        let base = tempdir().unwrap();
        let _guard = CacheRootGuard::set(base.path().to_path_buf());
        let dir = peak_cache_dir().unwrap();
        assert_eq!(dir, base.path().join("peak"));
        assert!(dir.is_dir());
    }
}
