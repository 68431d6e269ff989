//! Split-stereo pairs: two mono files carrying the `L`/`R` token.

use std::path::{Path, PathBuf};

use super::{AudioInfo, Backend, Decoder, Picture, ShortBuf};
use crate::error::WaveformError;

/// If `path` names the left file of a split pair, the path of the right file.
pub(super) fn right_hand_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let substituted = if let Some(idx) = name.find("%L") {
        let mut right = name.to_string();
        right.replace_range(idx..idx + 2, "%R");
        right
    } else if let Some(idx) = name.rfind("-L.") {
        let mut right = name.to_string();
        right.replace_range(idx..idx + 3, "-R.");
        right
    } else {
        return None;
    };
    Some(path.with_file_name(substituted))
}

/// Reads the left and right files in lockstep and presents them as one
/// stereo stream. Both files must agree on sample rate and frame count.
pub(super) struct SplitBackend {
    left: Box<Decoder>,
    right: Box<Decoder>,
    info: AudioInfo,
}

impl SplitBackend {
    pub(super) fn open(left_path: &Path, right_path: &Path) -> Result<Self, WaveformError> {
        let left = Decoder::open(left_path)?;
        let right = Decoder::open(right_path)?;

        if left.info().sample_rate != right.info().sample_rate {
            return Err(WaveformError::decode(
                left_path,
                "split pair sample rates differ",
            ));
        }

        let mut info = left.info().clone();
        info.channels = 2;
        Ok(Self {
            left: Box::new(left),
            right: Box::new(right),
            info,
        })
    }
}

impl Backend for SplitBackend {
    fn info(&self) -> &AudioInfo {
        &self.info
    }

    fn seek(&mut self, frame: u64) -> Result<u64, WaveformError> {
        let reached = self.left.seek(frame)?;
        self.right.seek(frame)?;
        Ok(reached)
    }

    fn read_short(&mut self, buf: &mut ShortBuf) -> Result<usize, WaveformError> {
        let frames = buf.capacity_frames();
        let mut left = ShortBuf::new(1, frames);
        let mut right = ShortBuf::new(1, frames);
        let n_left = self.left.read_short(&mut left)?;
        let n_right = self.right.read_short(&mut right)?;
        let n = n_left.min(n_right);
        buf.channels[0][..n].copy_from_slice(&left.channels[0][..n]);
        if buf.channels.len() > 1 {
            buf.channels[1][..n].copy_from_slice(&right.channels[0][..n]);
        }
        buf.len = n;
        Ok(n)
    }

    fn read_float(&mut self, out: &mut [f32]) -> Result<usize, WaveformError> {
        let frames = out.len() / 2;
        let mut left = vec![0.0_f32; frames];
        let mut right = vec![0.0_f32; frames];
        let n_left = self.left.read_float(&mut left)?;
        let n_right = self.right.read_float(&mut right)?;
        let n = n_left.min(n_right);
        for frame in 0..n {
            out[frame * 2] = left[frame];
            out[frame * 2 + 1] = right[frame];
        }
        Ok(n * 2)
    }

    fn read_peak(&mut self, out: &mut [i16]) -> Result<usize, WaveformError> {
        self.left.read_peak(out)
    }

    fn thumbnail(&mut self) -> Option<Picture> {
        self.left.thumbnail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec};

    fn write_mono(path: &Path, samples: &[i16]) {
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
    fn right_path_substitutes_both_token_styles() {
        assert_eq!(
            right_hand_path(Path::new("/x/take%L.wav")),
            Some(PathBuf::from("/x/take%R.wav"))
        );
        assert_eq!(
            right_hand_path(Path::new("/x/take-L.wav")),
            Some(PathBuf::from("/x/take-R.wav"))
        );
        assert_eq!(right_hand_path(Path::new("/x/take.wav")), None);
    }

    #[test]
    fn split_pair_reads_as_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let left_path = dir.path().join("take-L.wav");
        let right_path = dir.path().join("take-R.wav");
        write_mono(&left_path, &[100, 200, 300]);
        write_mono(&right_path, &[-100, -200, -300]);

        let mut decoder = Decoder::open(&left_path).unwrap();
        assert_eq!(decoder.info().channels, 2);

        let mut buf = ShortBuf::new(2, 4);
        let read = decoder.read_short(&mut buf).unwrap();
        assert_eq!(read, 3);
        assert_eq!(&buf.channels[0][..3], &[100, 200, 300]);
        assert_eq!(&buf.channels[1][..3], &[-100, -200, -300]);
    }
}
