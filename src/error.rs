use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported while loading, generating, or decoding waveform data.
///
/// The type is `Clone` so a single failure can fan out to every callback
/// registered on a load promise. IO sources are therefore carried as
/// rendered strings rather than `std::io::Error` values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaveformError {
    #[error("No such file or unreadable: {path}: {message}")]
    NoSuchFile { path: PathBuf, message: String },
    #[error("Peakfile {path} has an unsupported format: {reason}")]
    BadPeakFormat { path: PathBuf, reason: String },
    #[error("Peakfile {path} is too short: {actual} peaks, expected {expected}")]
    TooShortPeak {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("Failed to decode {path}: {message}")]
    DecodeFailed { path: PathBuf, message: String },
    #[error("Cancelled")]
    Cancelled,
    #[error("IO failure at {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("No cache directory available: {message}")]
    NoCacheDir { message: String },
}

impl WaveformError {
    pub(crate) fn no_such_file(path: &Path, source: &std::io::Error) -> Self {
        Self::NoSuchFile {
            path: path.to_path_buf(),
            message: source.to_string(),
        }
    }

    pub(crate) fn io(path: &Path, source: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: source.to_string(),
        }
    }

    pub(crate) fn decode(path: &Path, message: impl Into<String>) -> Self {
        Self::DecodeFailed {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn bad_peak(path: &Path, reason: impl Into<String>) -> Self {
        Self::BadPeakFormat {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
