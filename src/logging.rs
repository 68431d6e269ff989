//! Tracing setup.
//!
//! Each launch writes to stdout and to one log file under `wavetile-logs/`
//! in the cache root. The filename embeds the UTC start time, so names
//! sort chronologically and retention is a sort and a truncate rather than
//! an mtime scan. `RUST_LOG` filters both outputs; the default is `info`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

use crate::cache_dir;
use crate::error::WaveformError;

/// Launches kept on disk, including the current one.
const KEEP_LOGS: usize = 8;
const LOG_DIR: &str = "wavetile-logs";
const NAME_STAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]-[hour][minute][second]");

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("No directory available for logs: {0}")]
    NoLogDir(#[from] WaveformError),
    #[error("Failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to stamp the log file name: {0}")]
    Stamp(#[from] time::error::Format),
    #[error("A global tracing subscriber is already installed: {0}")]
    AlreadySet(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber. Idempotent; all failures are returned so
/// an embedder can carry on without file logging.
pub fn init() -> Result<(), LoggingError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let dir = cache_dir::cache_root()?.join(LOG_DIR);
    fs::create_dir_all(&dir).map_err(|source| LoggingError::Create {
        path: dir.clone(),
        source,
    })?;
    let path = dir.join(log_file_name(OffsetDateTime::now_utc())?);
    let file = fs::File::create(&path).map_err(|source| LoggingError::Create {
        path: path.clone(),
        source,
    })?;
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = GUARD.set(guard);

    // Retention runs after the subscriber is live so its own failures can
    // at least be seen; they never abort startup.
    prune_stale_logs(&dir);
    tracing::info!("logging to {}", path.display());
    Ok(())
}

fn log_file_name(started: OffsetDateTime) -> Result<String, time::error::Format> {
    Ok(format!("wavetile-{}.log", started.format(NAME_STAMP)?))
}

/// Delete the oldest launches beyond [`KEEP_LOGS`], oldest first by name.
fn prune_stale_logs(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("wavetile-") && name.ends_with(".log"))
        .collect();
    names.sort_unstable();
    while names.len() > KEEP_LOGS {
        let name = names.remove(0);
        if let Err(err) = fs::remove_file(dir.join(&name)) {
            tracing::warn!("could not remove stale log {name}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn log_names_sort_chronologically() {
        let morning = log_file_name(datetime!(2024-03-01 08:00:00 UTC)).unwrap();
        let evening = log_file_name(datetime!(2024-03-01 19:30:00 UTC)).unwrap();
        let next_day = log_file_name(datetime!(2024-03-02 00:00:01 UTC)).unwrap();
        assert_eq!(morning, "wavetile-20240301-080000.log");
        assert!(morning < evening);
        assert!(evening < next_day);
    }

    #[test]
    fn retention_keeps_the_newest_launches_only() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=(KEEP_LOGS + 3) {
            let stamp = datetime!(2024-03-01 12:00:00 UTC) + time::Duration::days(day as i64);
            let name = log_file_name(stamp).unwrap();
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), b"").unwrap();

        prune_stale_logs(dir.path());

        let mut logs: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".log"))
            .collect();
        logs.sort_unstable();
        assert_eq!(logs.len(), KEEP_LOGS);
        // the three oldest days are gone, the newest survives
        assert!(logs.first().unwrap().contains("20240305"));
        assert!(logs.last().unwrap().contains(&format!("202403{:02}", KEEP_LOGS + 4)));
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
