//! General decoder backend built on symphonia.
//!
//! Covers the compressed formats (mp3, flac, ogg/vorbis, aiff) and doubles
//! as a WAV fallback when the native reader rejects a file.

use std::{collections::VecDeque, fs::File, path::Path, path::PathBuf};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, Decoder as CodecDecoder, DecoderOptions},
    errors::Error as SymError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use super::{AudioInfo, Backend, Picture, ShortBuf, file_extension, order_metadata};
use crate::error::WaveformError;

pub(super) fn eval(path: &Path) -> u8 {
    match file_extension(path).as_deref() {
        Some("mp3") | Some("flac") | Some("ogg") | Some("oga") | Some("aiff") | Some("aif") => 80,
        // fallback position behind the native reader
        Some("wav") | Some("wave") => 40,
        _ => 0,
    }
}

pub(super) struct SymphoniaBackend {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn CodecDecoder>,
    track_id: u32,
    info: AudioInfo,
    channels: usize,
    /// Interleaved normalized samples decoded but not yet consumed.
    pending: VecDeque<f32>,
    visual: Option<Picture>,
    eof: bool,
    path: PathBuf,
}

impl SymphoniaBackend {
    pub(super) fn open(path: &Path) -> Result<Self, WaveformError> {
        let file = File::open(path).map_err(|err| WaveformError::no_such_file(path, &err))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = file_extension(path) {
            hint.with_extension(&ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|err| WaveformError::decode(path, err.to_string()))?;

        let mut format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| WaveformError::decode(path, "no decodable audio track"))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|err| WaveformError::decode(path, err.to_string()))?;

        let sample_rate = params.sample_rate.unwrap_or(0);
        let channels = params.channels.map(|c| c.count()).unwrap_or(0).max(1);
        let bit_depth = params.bits_per_sample.unwrap_or(16) as u16;

        let mut tags = Vec::new();
        let mut visual = None;
        collect_metadata(&mut probed.metadata, &mut tags, &mut visual);
        {
            let mut container_meta = format.metadata();
            if let Some(rev) = container_meta.skip_to_latest() {
                for tag in rev.tags() {
                    tags.push((tag.key.to_ascii_lowercase(), tag.value.to_string()));
                }
                if visual.is_none() {
                    if let Some(v) = rev.visuals().first() {
                        visual = Some(Picture {
                            media_type: v.media_type.clone(),
                            data: v.data.to_vec(),
                        });
                    }
                }
            }
        }

        let info = AudioInfo {
            sample_rate,
            channels: channels as u16,
            frames: params.n_frames.unwrap_or(0),
            bit_depth,
            bit_rate: sample_rate * bit_depth as u32 * channels as u32,
            metadata: order_metadata(tags),
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            info,
            channels,
            pending: VecDeque::new(),
            visual,
            eof: false,
            path: path.to_path_buf(),
        })
    }

    /// Decode packets until at least `min_samples` interleaved samples are
    /// buffered or the stream ends.
    fn fill_pending(&mut self, min_samples: usize) -> Result<(), WaveformError> {
        while !self.eof && self.pending.len() < min_samples {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    break;
                }
                Err(SymError::ResetRequired) => {
                    self.eof = true;
                    break;
                }
                Err(err) => {
                    return Err(WaveformError::decode(&self.path, err.to_string()));
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut sample_buf =
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    self.pending.extend(sample_buf.samples().iter().copied());
                }
                // A corrupt packet is recoverable; skip it.
                Err(SymError::DecodeError(err)) => {
                    tracing::debug!("skipping undecodable packet: {err}");
                }
                Err(err) => {
                    return Err(WaveformError::decode(&self.path, err.to_string()));
                }
            }
        }
        Ok(())
    }
}

fn collect_metadata(
    metadata: &mut symphonia::core::probe::ProbedMetadata,
    tags: &mut Vec<(String, String)>,
    visual: &mut Option<Picture>,
) {
    if let Some(metadata) = metadata.get().as_mut() {
        if let Some(rev) = metadata.skip_to_latest() {
            for tag in rev.tags() {
                tags.push((tag.key.to_ascii_lowercase(), tag.value.to_string()));
            }
            if let Some(v) = rev.visuals().first() {
                *visual = Some(Picture {
                    media_type: v.media_type.clone(),
                    data: v.data.to_vec(),
                });
            }
        }
    }
}

impl Backend for SymphoniaBackend {
    fn info(&self) -> &AudioInfo {
        &self.info
    }

    fn seek(&mut self, frame: u64) -> Result<u64, WaveformError> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|err| WaveformError::decode(&self.path, err.to_string()))?;
        self.decoder.reset();
        self.pending.clear();
        self.eof = false;
        Ok(seeked.actual_ts)
    }

    fn read_short(&mut self, buf: &mut ShortBuf) -> Result<usize, WaveformError> {
        let frames = buf.capacity_frames();
        self.fill_pending(frames * self.channels)?;
        let available_frames = (self.pending.len() / self.channels).min(frames);
        for frame in 0..available_frames {
            for c in 0..self.channels {
                let sample = self.pending.pop_front().unwrap_or(0.0);
                if let Some(chan) = buf.channels.get_mut(c) {
                    chan[frame] = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                }
            }
        }
        buf.len = available_frames;
        Ok(available_frames)
    }

    fn read_float(&mut self, out: &mut [f32]) -> Result<usize, WaveformError> {
        self.fill_pending(out.len())?;
        let n = self.pending.len().min(out.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap_or(0.0);
        }
        Ok(n)
    }

    fn read_peak(&mut self, out: &mut [i16]) -> Result<usize, WaveformError> {
        self.fill_pending(out.len())?;
        let n = self.pending.len().min(out.len());
        for slot in out.iter_mut().take(n) {
            let sample = self.pending.pop_front().unwrap_or(0.0);
            *slot = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        }
        Ok(n)
    }

    fn thumbnail(&mut self) -> Option<Picture> {
        self.visual.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec};

    fn write_wav(path: &Path, samples: &[i16]) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_wav_through_the_general_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_wav(&path, &[0, 8192, -8192, 0]);

        let mut backend = SymphoniaBackend::open(&path).unwrap();
        assert_eq!(backend.info().sample_rate, 8_000);
        assert_eq!(backend.info().channels, 1);

        let mut buf = ShortBuf::new(1, 4);
        let read = backend.read_short(&mut buf).unwrap();
        assert_eq!(read, 4);
        assert!((buf.channels[0][1] - 8192).abs() <= 1);
        assert!((buf.channels[0][2] + 8192).abs() <= 1);
    }

    #[test]
    fn eval_prefers_compressed_extensions() {
        assert!(eval(Path::new("x.mp3")) > eval(Path::new("x.wav")));
        assert_eq!(eval(Path::new("x.xyz")), 0);
    }
}
