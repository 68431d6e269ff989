//! The RIFF-wrapped peakfile format.
//!
//! A peakfile is an ordinary little-endian 16-bit PCM WAV whose payload is
//! peak pairs rather than audio. The flat sample order per peak `i` is
//! `[ch0.max, ch0.min, ch1.max, ch1.min]`, so a file of `n` WAV frames holds
//! `n / 2` peaks for both mono and stereo sources. Each peak summarises
//! [`PEAK_RATIO`] input frames.

use std::{
    fs::File,
    io::{BufWriter, Seek, Write},
    path::Path,
    time::SystemTime,
};

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::warn;

use super::{PEAK_VALUES_PER_SAMPLE, PeakBuf};
use crate::error::WaveformError;

/// Shortfalls up to this many peaks are logged quietly; the file is still
/// rejected for rendering.
const SHORTFALL_WARN_LIMIT: u64 = 32;

/// True when the peakfile exists and is at least as new as the audio file.
///
/// An older file at the same path after a source swap is not detected; the
/// freedesktop thumbnail spec has the same blind spot.
pub fn is_current(audio_file: &Path, peak_file: &Path) -> bool {
    let Ok(peak_meta) = std::fs::metadata(peak_file) else {
        return false;
    };
    let Ok(audio_meta) = std::fs::metadata(audio_file) else {
        return false;
    };
    let peak_mtime = peak_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let audio_mtime = audio_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    peak_mtime >= audio_mtime
}

/// Load a peakfile, validating against the expected peak count when known.
pub fn read(path: &Path, expected_peaks: Option<u64>) -> Result<PeakBuf, WaveformError> {
    let mut reader = hound::WavReader::open(path).map_err(|err| match err {
        hound::Error::IoError(io) => WaveformError::no_such_file(path, &io),
        other => WaveformError::bad_peak(path, other.to_string()),
    })?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(WaveformError::bad_peak(path, "not 16-bit PCM"));
    }
    if spec.channels == 0 || spec.channels > 2 {
        return Err(WaveformError::bad_peak(
            path,
            format!("{} channels", spec.channels),
        ));
    }
    let channels = spec.channels as usize;

    let mut flat = Vec::with_capacity(reader.len() as usize);
    for sample in reader.samples::<i16>() {
        flat.push(sample.map_err(|err| WaveformError::bad_peak(path, err.to_string()))?);
    }

    let mut num_peaks = (flat.len() / (PEAK_VALUES_PER_SAMPLE * channels)) as u64;
    if let Some(expected) = expected_peaks {
        if num_peaks < expected {
            let shortfall = expected - num_peaks;
            if shortfall <= SHORTFALL_WARN_LIMIT {
                warn!(
                    "peakfile {} short by {shortfall} peaks (expected {expected})",
                    path.display()
                );
            }
            return Err(WaveformError::TooShortPeak {
                path: path.to_path_buf(),
                expected,
                actual: num_peaks,
            });
        }
        if num_peaks > expected {
            warn!(
                "peakfile {} longer than expected: {num_peaks} > {expected}",
                path.display()
            );
            num_peaks = expected;
        }
    }
    if num_peaks == 0 {
        return Err(WaveformError::TooShortPeak {
            path: path.to_path_buf(),
            expected: expected_peaks.unwrap_or(0),
            actual: 0,
        });
    }

    // Deinterleave [c0.max, c0.min, c1.max, c1.min, ...] into per-channel
    // pair buffers.
    let mut buf = PeakBuf {
        channels: vec![Vec::with_capacity(num_peaks as usize * 2); channels],
    };
    for i in 0..num_peaks as usize {
        for (c, chan) in buf.channels.iter_mut().enumerate() {
            let src = PEAK_VALUES_PER_SAMPLE * (i * channels + c);
            chan.push(flat[src]);
            chan.push(flat[src + 1]);
        }
    }
    Ok(buf)
}

/// Incremental peakfile writer used by the generator.
pub struct PeakWriter<W: Write + Seek> {
    writer: WavWriter<W>,
    channels: usize,
    peaks_written: u64,
}

impl PeakWriter<BufWriter<File>> {
    pub fn create(path: &Path, channels: u16, sample_rate: u32) -> Result<Self, WaveformError> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer =
            WavWriter::create(path, spec).map_err(|err| WaveformError::bad_peak(path, err.to_string()))?;
        Ok(Self {
            writer,
            channels: channels as usize,
            peaks_written: 0,
        })
    }
}

impl<W: Write + Seek> PeakWriter<W> {
    /// Append one peak: a (max,min) pair per channel.
    pub fn write_peak(&mut self, pairs: &[(i16, i16)]) -> Result<(), hound::Error> {
        for &(max, min) in pairs.iter().take(self.channels) {
            self.writer.write_sample(max)?;
            self.writer.write_sample(min)?;
        }
        self.peaks_written += 1;
        Ok(())
    }

    pub fn peaks_written(&self) -> u64 {
        self.peaks_written
    }

    /// Pad with zero peaks until `target` peaks have been written.
    pub fn pad_to(&mut self, target: u64) -> Result<(), hound::Error> {
        while self.peaks_written < target {
            let zeros = vec![(0, 0); self.channels];
            self.write_peak(&zeros)?;
        }
        Ok(())
    }

    pub fn finalize(self) -> Result<(), hound::Error> {
        self.writer.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_peakfile(path: &Path, channels: u16, peaks: &[Vec<(i16, i16)>]) {
        let mut writer = PeakWriter::create(path, channels, 44_100).unwrap();
        for pairs in peaks {
            writer.write_peak(pairs).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn round_trip_preserves_the_peak_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.peak");
        let peaks = vec![
            vec![(100, -50), (70, -80)],
            vec![(200, -10), (0, 0)],
            vec![(5, -5), (6, -6)],
        ];
        write_peakfile(&path, 2, &peaks);

        let buf = read(&path, Some(3)).unwrap();
        assert_eq!(buf.n_channels(), 2);
        assert_eq!(buf.num_peaks(), 3);
        assert_eq!(buf.pair(0, 0), (100, -50));
        assert_eq!(buf.pair(1, 0), (70, -80));
        assert_eq!(buf.pair(0, 1), (200, -10));
        assert_eq!(buf.pair(1, 2), (6, -6));
    }

    #[test]
    fn short_peakfile_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.peak");
        write_peakfile(&path, 1, &[vec![(1, -1)], vec![(2, -2)]]);

        let err = read(&path, Some(10)).unwrap_err();
        assert_eq!(
            err,
            WaveformError::TooShortPeak {
                path: path.clone(),
                expected: 10,
                actual: 2
            }
        );
    }

    #[test]
    fn long_peakfile_is_truncated_to_expectation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.peak");
        write_peakfile(&path, 1, &[vec![(1, -1)], vec![(2, -2)], vec![(3, -3)]]);

        let buf = read(&path, Some(2)).unwrap();
        assert_eq!(buf.num_peaks(), 2);
    }

    #[test]
    fn float_wav_is_a_bad_peak_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.peak");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5_f32).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(
            read(&path, None),
            Err(WaveformError::BadPeakFormat { .. })
        ));
    }

    #[test]
    fn padding_fills_to_the_expected_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.peak");
        let mut writer = PeakWriter::create(&path, 1, 44_100).unwrap();
        writer.write_peak(&[(9, -9)]).unwrap();
        writer.pad_to(4).unwrap();
        assert_eq!(writer.peaks_written(), 4);
        writer.finalize().unwrap();

        let buf = read(&path, Some(4)).unwrap();
        assert_eq!(buf.num_peaks(), 4);
        assert_eq!(buf.pair(0, 3), (0, 0));
    }

    #[test]
    fn stale_peakfile_is_not_current() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("a.wav");
        let peak = dir.path().join("a.peak");
        std::fs::write(&peak, b"x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&audio, b"y").unwrap();
        assert!(!is_current(&audio, &peak));

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&peak, b"x2").unwrap();
        assert!(is_current(&audio, &peak));
    }

    #[test]
    fn peak_ratio_documented_by_sizes() {
        // 10 s of 44.1 kHz mono: 441000 frames -> 1723 peaks -> 6892 bytes
        // of payload (2 values x 2 bytes each).
        let peaks = super::super::expected_peaks(441_000);
        assert_eq!(peaks * (PEAK_VALUES_PER_SAMPLE * 2) as u64, 6_892);
    }
}
