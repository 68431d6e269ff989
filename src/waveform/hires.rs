//! Hi-res peak buffers, derived from decoded audio one block at a time.
//!
//! `input_resolution` is always 1 (the decoded audio itself); the requested
//! tier picks the output resolution. Jumps go in steps of x16: the common
//! case is resolution 16, and tiers above 3 use the audio at full
//! resolution. A buffer is rebuilt whole whenever its audio block reloads,
//! never patched.

use crate::peak::{PEAK_BLOCK_SIZE, PEAK_VALUES_PER_SAMPLE};

use super::audio::AudioBuf;

/// One hi-res peak block: (max,min) pairs per channel covering
/// [`PEAK_BLOCK_SIZE`] frames at `resolution` frames per pair.
#[derive(Debug, Clone)]
pub struct PeakBlock {
    pub block: usize,
    /// Frames per output pair: a power of two, 1..=128.
    pub resolution: u32,
    pub channels: Vec<Vec<i16>>,
    /// Highest absolute value seen, for vertical-zoom decisions.
    pub max_level: i16,
}

impl PeakBlock {
    pub fn n_pairs(&self) -> usize {
        self.channels
            .first()
            .map(|c| c.len() / PEAK_VALUES_PER_SAMPLE)
            .unwrap_or(0)
    }

    pub fn pair(&self, channel: usize, i: usize) -> (i16, i16) {
        let chan = &self.channels[channel];
        (chan[2 * i], chan[2 * i + 1])
    }
}

/// Output resolution for a minimum-tier request.
pub fn resolution_for_tiers(min_output_tiers: u32) -> u32 {
    if min_output_tiers > 3 { 1 } else { 16 }
}

/// Derive the peak block for `block` from its decoded audio.
pub fn regen(audio: &AudioBuf, block: usize, min_output_tiers: u32) -> PeakBlock {
    let resolution = resolution_for_tiers(min_output_tiers);
    let n_pairs = PEAK_BLOCK_SIZE / resolution as usize;

    let mut channels = Vec::with_capacity(audio.channels.len());
    let mut max_level = 0_i16;
    for samples in &audio.channels {
        let mut pairs = vec![0_i16; n_pairs * PEAK_VALUES_PER_SAMPLE];
        for (i, out) in pairs.chunks_exact_mut(2).enumerate() {
            let start = i * resolution as usize;
            let end = (start + resolution as usize).min(samples.len());
            let mut max = 0_i16;
            let mut min = 0_i16;
            if start < end {
                for &value in &samples[start..end] {
                    max = max.max(value);
                    min = min.min(value);
                }
            }
            out[0] = max;
            out[1] = min;
            max_level = max_level.max(max).max(min.saturating_neg());
        }
        channels.push(pairs);
    }

    PeakBlock {
        block,
        resolution,
        channels,
        max_level,
    }
}
