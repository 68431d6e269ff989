//! Uniform decoder façade over multiple codec backends.
//!
//! `Decoder::open` scores every registered backend against the filename and
//! opens the best match: the native WAV reader wins for `.wav`/`.peak`
//! files, the general symphonia backend covers compressed formats. A
//! filename carrying the split-stereo token (`%L`, or `-L` before the
//! extension) opens a paired decoder whose right channel comes from the
//! sibling `R` file.

mod split;
mod symphonia;
mod wav;

use std::path::Path;

use crate::error::WaveformError;

/// Stream properties reported by [`Decoder::info`].
#[derive(Debug, Clone, Default)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Total frame count. An estimate for some compressed formats until the
    /// stream has been fully decoded.
    pub frames: u64,
    pub bit_depth: u16,
    pub bit_rate: u32,
    /// Ordered key/value metadata; well-known keys are promoted to the head.
    pub metadata: Vec<(String, String)>,
}

/// An embedded picture extracted from stream metadata.
#[derive(Debug, Clone)]
pub struct Picture {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Per-channel 16-bit read buffer.
///
/// Each channel vector is allocated at the requested capacity; `len` holds
/// the number of valid frames after a read (the last block of a file will
/// usually come up short).
pub struct ShortBuf {
    pub channels: Vec<Vec<i16>>,
    pub len: usize,
}

impl ShortBuf {
    pub fn new(n_channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0; frames]; n_channels.max(1)],
            len: 0,
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }
}

pub(crate) trait Backend: Send {
    fn info(&self) -> &AudioInfo;
    /// Seek to an absolute frame; returns the frame actually reached.
    fn seek(&mut self, frame: u64) -> Result<u64, WaveformError>;
    /// Deinterleave up to `buf.capacity_frames()` frames into `buf`.
    fn read_short(&mut self, buf: &mut ShortBuf) -> Result<usize, WaveformError>;
    /// Read interleaved normalized floats; returns samples read.
    fn read_float(&mut self, out: &mut [f32]) -> Result<usize, WaveformError>;
    /// Raw 16-bit samples in file order, for peakfile payloads.
    fn read_peak(&mut self, out: &mut [i16]) -> Result<usize, WaveformError>;
    fn thumbnail(&mut self) -> Option<Picture> {
        None
    }
}

pub struct Decoder {
    backend: Box<dyn Backend>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder").finish_non_exhaustive()
    }
}

impl Decoder {
    pub fn open(path: &Path) -> Result<Self, WaveformError> {
        if let Some(right) = split::right_hand_path(path) {
            let backend = split::SplitBackend::open(path, &right)?;
            return Ok(Self {
                backend: Box::new(backend),
            });
        }

        let mut candidates: Vec<(u8, u8)> = vec![(wav::eval(path), 0), (symphonia::eval(path), 1)];
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut last_err = WaveformError::decode(path, "no decoder backend for this file type");
        for (score, which) in candidates {
            if score == 0 {
                continue;
            }
            let result: Result<Box<dyn Backend>, WaveformError> = match which {
                0 => wav::WavBackend::open(path).map(|b| Box::new(b) as Box<dyn Backend>),
                _ => {
                    symphonia::SymphoniaBackend::open(path).map(|b| Box::new(b) as Box<dyn Backend>)
                }
            };
            match result {
                Ok(backend) => return Ok(Self { backend }),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    pub fn info(&self) -> &AudioInfo {
        self.backend.info()
    }

    pub fn seek(&mut self, frame: u64) -> Result<u64, WaveformError> {
        self.backend.seek(frame)
    }

    pub fn read_short(&mut self, buf: &mut ShortBuf) -> Result<usize, WaveformError> {
        self.backend.read_short(buf)
    }

    pub fn read_float(&mut self, out: &mut [f32]) -> Result<usize, WaveformError> {
        self.backend.read_float(out)
    }

    pub fn read_peak(&mut self, out: &mut [i16]) -> Result<usize, WaveformError> {
        self.backend.read_peak(out)
    }

    pub fn thumbnail(&mut self) -> Option<Picture> {
        self.backend.thumbnail()
    }
}

/// True when the filename designates the left file of a split-stereo pair.
pub fn is_split_stereo(path: &Path) -> bool {
    split::right_hand_path(path).is_some()
}

const PROMOTED_KEYS: [&str; 5] = ["artist", "title", "album", "track", "date"];

/// Order metadata so artist/title/album/track/date lead, in that order, with
/// the remaining tags following in decode order.
pub(crate) fn order_metadata(tags: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut head = Vec::new();
    let mut tail = Vec::new();
    let mut rest = tags;
    for key in PROMOTED_KEYS {
        let mut keep = Vec::new();
        for (k, v) in rest {
            if k.eq_ignore_ascii_case(key) {
                head.push((k, v));
            } else {
                keep.push((k, v));
            }
        }
        rest = keep;
    }
    tail.extend(rest);
    head.extend(tail);
    head
}

pub(crate) fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn metadata_promotion_keeps_declared_order() {
        let tags = vec![
            ("comment".to_string(), "x".to_string()),
            ("date".to_string(), "1999".to_string()),
            ("Artist".to_string(), "someone".to_string()),
            ("genre".to_string(), "noise".to_string()),
            ("title".to_string(), "tone".to_string()),
        ];
        let ordered = order_metadata(tags);
        let keys: Vec<&str> = ordered.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["Artist", "title", "date", "comment", "genre"]);
    }

    #[test]
    fn open_missing_wav_reports_no_such_file() {
        let err = Decoder::open(&PathBuf::from("/nowhere/bad.wav")).unwrap_err();
        assert!(matches!(err, WaveformError::NoSuchFile { .. }));
    }

    #[test]
    fn split_token_is_detected() {
        assert!(is_split_stereo(Path::new("/a/take%L.wav")));
        assert!(is_split_stereo(Path::new("/a/take-L.wav")));
        assert!(!is_split_stereo(Path::new("/a/take.wav")));
    }
}
