//! Peakfile generation and the on-disk cache.
//!
//! Output goes to a temporary file in the OS temp directory and is renamed
//! into the cache once complete, so other processes never observe a partial
//! peakfile. Cache entries are keyed by the MD5 of the source file URI and
//! expire after 90 days without an mtime bump. There is no size limit on the
//! cache directory.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use md5::{Digest, Md5};
use tracing::{debug, warn};

use super::{NEGATIVE_CLAMP, PEAK_RATIO, codec, codec::PeakWriter, expected_peaks};
use crate::{
    cache_dir,
    config,
    decoder::{Decoder, ShortBuf},
    error::WaveformError,
    waveform::Waveform,
    worker,
};

static CACHE_SWEPT: AtomicBool = AtomicBool::new(false);

/// Number of 256-frame windows read per decoder call.
const READ_WINDOWS: usize = 8;

/// The cache path for a source file: `<cache>/peak/<md5(file_uri)>.peak`.
pub fn peak_filename_for(audio_path: &Path) -> Result<PathBuf, WaveformError> {
    let dir = cache_dir::peak_cache_dir()?;
    let absolute = absolute_path(audio_path)?;
    let uri = file_uri(&absolute);
    let mut hasher = Md5::new();
    hasher.update(uri.as_bytes());
    let digest = hasher.finalize();
    Ok(dir.join(format!("{digest:x}.peak")))
}

fn absolute_path(path: &Path) -> Result<PathBuf, WaveformError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| WaveformError::io(path, &err))
}

/// `file://` URI with minimal percent-encoding (matches GLib for the
/// common cases; collisions only matter within one user's cache).
fn file_uri(absolute: &Path) -> String {
    let mut uri = String::from("file://");
    for byte in absolute.to_string_lossy().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'/' | b'.' | b'-' | b'_' | b'~' => {
                uri.push(byte as char);
            }
            other => {
                uri.push_str(&format!("%{other:02X}"));
            }
        }
    }
    uri
}

/// Generate a peakfile for `audio_path` at `peak_path`, synchronously.
///
/// Streams the audio in `PEAK_RATIO * 8`-frame chunks and stores one
/// (max,min) pair per channel per 256-frame window.
pub fn generate_sync(audio_path: &Path, peak_path: &Path) -> Result<(), WaveformError> {
    let mut decoder = Decoder::open(audio_path)?;
    let info = decoder.info().clone();
    let channels = info.channels.clamp(1, 2) as usize;

    let tmp = tempfile::Builder::new()
        .prefix("wavetile-")
        .suffix(".peak")
        .tempfile_in(std::env::temp_dir())
        .map_err(|err| WaveformError::io(peak_path, &err))?;
    let tmp_path = tmp.into_temp_path();

    let mut writer = PeakWriter::create(&tmp_path, channels as u16, info.sample_rate.max(1))?;
    let mut buf = ShortBuf::new(channels, PEAK_RATIO * READ_WINDOWS);
    let mut total_read: u64 = 0;

    loop {
        let n = decoder.read_short(&mut buf)?;
        if n == 0 {
            break;
        }
        total_read += n as u64;

        let n_windows = n.div_ceil(PEAK_RATIO);
        for window in 0..n_windows {
            let start = window * PEAK_RATIO;
            let end = (start + PEAK_RATIO).min(n);
            let mut pairs = vec![(0_i16, 0_i16); channels];
            for (c, pair) in pairs.iter_mut().enumerate() {
                for &value in &buf.channels[c][start..end] {
                    pair.0 = pair.0.max(value);
                    pair.1 = pair.1.min(value.max(NEGATIVE_CLAMP));
                }
            }
            writer
                .write_peak(&pairs)
                .map_err(|err| WaveformError::bad_peak(peak_path, err.to_string()))?;
        }
    }

    if total_read == 0 {
        return Err(WaveformError::decode(
            audio_path,
            "source contains no audio frames",
        ));
    }

    let expected = expected_peaks(info.frames.max(total_read));
    if writer.peaks_written() != expected {
        warn!(
            "peakgen {}: wrote {} peaks, expected {expected}",
            audio_path.display(),
            writer.peaks_written()
        );
        writer
            .pad_to(expected)
            .map_err(|err| WaveformError::bad_peak(peak_path, err.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|err| WaveformError::bad_peak(peak_path, err.to_string()))?;

    persist(tmp_path, peak_path)?;
    maybe_sweep_cache();
    Ok(())
}

/// Rename into place; falls back to copy when the temp dir is on a
/// different filesystem than the cache.
fn persist(tmp_path: tempfile::TempPath, peak_path: &Path) -> Result<(), WaveformError> {
    match tmp_path.persist(peak_path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let tmp = err.path;
            std::fs::copy(&tmp, peak_path)
                .map(|_| ())
                .map_err(|source| WaveformError::io(peak_path, &source))
        }
    }
}

/// Resolve (or create) the peakfile for a waveform, blocking.
///
/// For an offline waveform an existing peakfile is still usable; a missing
/// one is an error since the source cannot be read.
pub fn ensure_peakfile_sync(waveform: &Waveform) -> Result<PathBuf, WaveformError> {
    let audio = absolute_path(waveform.path())?;
    let peak = peak_filename_for(&audio)?;

    if waveform.is_offline() {
        if peak.exists() {
            return Ok(peak);
        }
        return Err(WaveformError::NoSuchFile {
            path: audio,
            message: "offline and no cached peakfile".into(),
        });
    }
    if codec::is_current(&audio, &peak) {
        debug!("peakfile current: {}", peak.display());
        return Ok(peak);
    }
    generate_sync(&audio, &peak)?;
    Ok(peak)
}

/// Asynchronously ensure that a peakfile exists for the given waveform.
///
/// The callback runs on the main thread (the worker drain) with either the
/// peak path or the generation error; it is skipped if the waveform is
/// dropped first.
pub fn ensure_peakfile_async(
    waveform: &Arc<Waveform>,
    callback: impl FnOnce(Option<Arc<Waveform>>, Result<PathBuf, WaveformError>) + Send + 'static,
) {
    let audio = match absolute_path(waveform.path()) {
        Ok(path) => path,
        Err(err) => {
            callback(Some(Arc::clone(waveform)), Err(err));
            return;
        }
    };
    let peak = match peak_filename_for(&audio) {
        Ok(path) => path,
        Err(err) => {
            callback(Some(Arc::clone(waveform)), Err(err));
            return;
        }
    };

    if codec::is_current(&audio, &peak) || (waveform.is_offline() && peak.exists()) {
        callback(Some(Arc::clone(waveform)), Ok(peak));
        return;
    }
    if waveform.is_offline() {
        callback(
            Some(Arc::clone(waveform)),
            Err(WaveformError::NoSuchFile {
                path: audio,
                message: "offline and no cached peakfile".into(),
            }),
        );
        return;
    }

    let slot: Arc<Mutex<Option<Result<PathBuf, WaveformError>>>> = Arc::new(Mutex::new(None));
    let work_slot = Arc::clone(&slot);
    worker::peak_worker().push_job(
        waveform,
        None,
        move |_waveform| {
            let result = generate_sync(&audio, &peak).map(|()| peak.clone());
            *work_slot.lock().expect("peakgen result slot") = Some(result);
        },
        move |waveform| {
            let result = slot
                .lock()
                .expect("peakgen result slot")
                .take()
                .unwrap_or(Err(WaveformError::Cancelled));
            callback(waveform, result);
        },
    );
}

fn maybe_sweep_cache() {
    if CACHE_SWEPT.swap(true, Ordering::SeqCst) {
        return;
    }
    let Ok(dir) = cache_dir::peak_cache_dir() else {
        return;
    };
    sweep_cache_dir(&dir, config::peak_cache_expiry_days());
}

/// Delete cache entries whose mtime is older than `expiry_days`.
fn sweep_cache_dir(dir: &Path, expiry_days: u64) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let now = SystemTime::now();
    let expiry = Duration::from_secs(expiry_days * 24 * 60 * 60);
    let mut n_deleted = 0_usize;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("peak") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if now.duration_since(mtime).map(|age| age > expiry).unwrap_or(false) {
            if std::fs::remove_file(&path).is_ok() {
                n_deleted += 1;
            }
        }
    }
    debug!("peak cache sweep: {n_deleted} expired files deleted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec};

    fn write_tone(path: &Path, channels: u16, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for c in 0..channels {
                let value = (((i + c as usize) % 256) as i16 - 128) * 100;
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn mono_peakfile_has_expected_size_and_channels() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        let peak = dir.path().join("tone.peak");
        write_tone(&audio, 1, 441_000); // 10 s at 44.1 kHz

        generate_sync(&audio, &peak).unwrap();

        let reader = hound::WavReader::open(&peak).unwrap();
        assert_eq!(reader.spec().channels, 1);
        let data_bytes = reader.len() as u64 * 2;
        assert!((data_bytes as i64 - 6_890).unsigned_abs() <= 80, "{data_bytes}");
    }

    #[test]
    fn stereo_peakfile_doubles_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        let peak = dir.path().join("tone.peak");
        write_tone(&audio, 2, 441_000);

        generate_sync(&audio, &peak).unwrap();

        let reader = hound::WavReader::open(&peak).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let data_bytes = reader.len() as u64 * 2;
        assert!((data_bytes as i64 - 13_780).unsigned_abs() <= 160, "{data_bytes}");
    }

    #[test]
    fn generated_peaks_match_the_source_extrema() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("steps.wav");
        let peak = dir.path().join("steps.peak");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&audio, spec).unwrap();
        // window 0: extrema +1000/-500; window 1: +25/-25
        for i in 0..256 {
            writer
                .write_sample(match i {
                    10 => 1000_i16,
                    20 => -500,
                    _ => 0,
                })
                .unwrap();
        }
        for i in 0..256 {
            writer.write_sample(if i % 2 == 0 { 25_i16 } else { -25 }).unwrap();
        }
        writer.finalize().unwrap();

        generate_sync(&audio, &peak).unwrap();
        let buf = codec::read(&peak, Some(2)).unwrap();
        assert_eq!(buf.pair(0, 0), (1000, -500));
        assert_eq!(buf.pair(0, 1), (25, -25));
    }

    #[test]
    fn negative_peaks_are_clamped_symmetric() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("full.wav");
        let peak = dir.path().join("full.peak");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&audio, spec).unwrap();
        for _ in 0..256 {
            writer.write_sample(i16::MIN).unwrap();
        }
        writer.finalize().unwrap();

        generate_sync(&audio, &peak).unwrap();
        let buf = codec::read(&peak, Some(1)).unwrap();
        assert_eq!(buf.pair(0, 0).1, -32_767);
    }

    #[test]
    fn bad_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("bad.wav");
        let peak = dir.path().join("bad.peak");
        assert!(generate_sync(&audio, &peak).is_err());
        assert!(!peak.exists());
    }

    #[test]
    fn empty_source_is_an_error_and_leaves_no_peakfile() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("empty.wav");
        let peak = dir.path().join("empty.peak");
        write_tone(&audio, 1, 0);

        let err = generate_sync(&audio, &peak).unwrap_err();
        assert!(matches!(err, WaveformError::DecodeFailed { .. }));
        assert!(!peak.exists());
    }

    #[test]
    fn split_stereo_pair_interleaves_into_one_peakfile() {
        let dir = tempfile::tempdir().unwrap();
        let left = dir.path().join("take-L.wav");
        let right = dir.path().join("take-R.wav");
        let peak = dir.path().join("take.peak");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        for (path, level) in [(&left, 1000_i16), (&right, -2000)] {
            let mut writer = hound::WavWriter::create(path, spec).unwrap();
            for _ in 0..256 {
                writer.write_sample(level).unwrap();
            }
            writer.finalize().unwrap();
        }

        generate_sync(&left, &peak).unwrap();
        let buf = codec::read(&peak, Some(1)).unwrap();
        assert_eq!(buf.n_channels(), 2);
        assert_eq!(buf.pair(0, 0).0, 1000);
        assert_eq!(buf.pair(1, 0).1, -2000);
    }

    #[test]
    fn sweep_deletes_only_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.peak");
        let fresh = dir.path().join("fresh.peak");
        std::fs::write(&old, b"x").unwrap();
        std::fs::write(&fresh, b"x").unwrap();

        // An expiry of zero days makes everything with a past mtime stale.
        std::thread::sleep(Duration::from_millis(50));
        sweep_cache_dir(dir.path(), 0);
        assert!(!old.exists());
        assert!(!fresh.exists());

        std::fs::write(&fresh, b"x").unwrap();
        sweep_cache_dir(dir.path(), 90);
        assert!(fresh.exists());
    }

    #[test]
    fn uri_hashing_is_stable() {
        let a = peak_filename_for_uri_test("/tmp/some file.wav");
        let b = peak_filename_for_uri_test("/tmp/some file.wav");
        let c = peak_filename_for_uri_test("/tmp/other.wav");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    fn peak_filename_for_uri_test(path: &str) -> String {
        let uri = file_uri(Path::new(path));
        let mut hasher = Md5::new();
        hasher.update(uri.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    #[test]
    fn file_uri_percent_encodes_spaces() {
        assert_eq!(
            file_uri(Path::new("/a/b c.wav")),
            "file:///a/b%20c.wav"
        );
    }
}
