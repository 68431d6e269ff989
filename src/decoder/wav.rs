//! Native WAV backend. Also reads the RIFF-wrapped peakfile payloads.

use std::{fs::File, io::BufReader, path::Path};

use hound::{SampleFormat, WavReader};

use super::{AudioInfo, Backend, ShortBuf, file_extension};
use crate::error::WaveformError;

/// Suitability score for this backend. The native reader is preferred for
/// anything RIFF.
pub(super) fn eval(path: &Path) -> u8 {
    match file_extension(path).as_deref() {
        Some("wav") | Some("wave") | Some("peak") => 100,
        _ => 0,
    }
}

pub(super) struct WavBackend {
    reader: WavReader<BufReader<File>>,
    info: AudioInfo,
    path: std::path::PathBuf,
}

impl WavBackend {
    pub(super) fn open(path: &Path) -> Result<Self, WaveformError> {
        let reader = WavReader::open(path).map_err(|err| match err {
            hound::Error::IoError(io) => WaveformError::no_such_file(path, &io),
            other => WaveformError::decode(path, other.to_string()),
        })?;
        let spec = reader.spec();
        let frames = reader.duration() as u64;
        let info = AudioInfo {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            frames,
            bit_depth: spec.bits_per_sample,
            bit_rate: spec.sample_rate * spec.bits_per_sample as u32 * spec.channels as u32,
            metadata: Vec::new(),
        };
        Ok(Self {
            reader,
            info,
            path: path.to_path_buf(),
        })
    }

    /// Pull up to `count` samples in file order, converted to i16.
    fn next_shorts(&mut self, out: &mut [i16]) -> Result<usize, WaveformError> {
        let spec = self.reader.spec();
        let mut n = 0;
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, bits) if bits <= 16 => {
                let shift = 16 - bits;
                for sample in self.reader.samples::<i16>().take(out.len()) {
                    let value =
                        sample.map_err(|err| WaveformError::decode(&self.path, err.to_string()))?;
                    out[n] = value << shift;
                    n += 1;
                }
            }
            (SampleFormat::Int, bits) => {
                let shift = bits - 16;
                for sample in self.reader.samples::<i32>().take(out.len()) {
                    let value =
                        sample.map_err(|err| WaveformError::decode(&self.path, err.to_string()))?;
                    out[n] = (value >> shift) as i16;
                    n += 1;
                }
            }
            (SampleFormat::Float, _) => {
                for sample in self.reader.samples::<f32>().take(out.len()) {
                    let value =
                        sample.map_err(|err| WaveformError::decode(&self.path, err.to_string()))?;
                    out[n] = (value.clamp(-1.0, 1.0) * 32767.0) as i16;
                    n += 1;
                }
            }
        }
        Ok(n)
    }
}

impl Backend for WavBackend {
    fn info(&self) -> &AudioInfo {
        &self.info
    }

    fn seek(&mut self, frame: u64) -> Result<u64, WaveformError> {
        let frame = frame.min(self.info.frames);
        self.reader
            .seek(frame as u32)
            .map_err(|err| WaveformError::io(&self.path, &err))?;
        Ok(frame)
    }

    fn read_short(&mut self, buf: &mut ShortBuf) -> Result<usize, WaveformError> {
        let channels = self.info.channels.max(1) as usize;
        let frames = buf.capacity_frames();
        let mut interleaved = vec![0_i16; frames * channels];
        let samples = self.next_shorts(&mut interleaved)?;
        let frames_read = samples / channels;
        for frame in 0..frames_read {
            for (c, chan) in buf.channels.iter_mut().take(channels).enumerate() {
                chan[frame] = interleaved[frame * channels + c];
            }
        }
        buf.len = frames_read;
        Ok(frames_read)
    }

    fn read_float(&mut self, out: &mut [f32]) -> Result<usize, WaveformError> {
        let mut shorts = vec![0_i16; out.len()];
        let n = self.next_shorts(&mut shorts)?;
        for (dst, src) in out.iter_mut().zip(shorts.iter().take(n)) {
            *dst = *src as f32 / 32768.0;
        }
        Ok(n)
    }

    fn read_peak(&mut self, out: &mut [i16]) -> Result<usize, WaveformError> {
        self.next_shorts(out)
    }
}
