//! Peak data: constants, the on-disk peakfile codec, and the generator.

pub mod codec;
pub mod peakgen;

/// Frames summarised by one stored (max,min) peak pair.
pub const PEAK_RATIO: usize = 256;
/// One positive and one negative value per peak.
pub const PEAK_VALUES_PER_SAMPLE: usize = 2;
/// Peakfile datapoints per texture.
pub const PEAK_TEXTURE_SIZE: usize = 256;
/// Frames per audio/hi-res block: one block fills one medium-res texture.
pub const PEAK_BLOCK_SIZE: usize = PEAK_RATIO * PEAK_TEXTURE_SIZE;
/// Overlap between adjacent textures, in peakfile datapoints, so linear
/// sampling stays continuous across block edges.
pub const TEX_BORDER: usize = 2;
/// Hard cap on total frames (192 kHz for 7 days).
pub const MAX_FRAMES: u64 = 116_121_600_000;
/// Resolution tiers: tier t yields one output value per `256 >> t` frames.
pub const MAX_TIERS: u32 = 8;

/// Negative peaks are clamped here; `i16::MIN` breaks sign-flipped rendering.
pub const NEGATIVE_CLAMP: i16 = -32767;

/// Peakfile datapoints per texture that are not border.
pub const VISIBLE_BLOCK_PEAKS: usize = PEAK_TEXTURE_SIZE - 2 * TEX_BORDER;
/// Frames per block excluding the borders shared with the neighbours;
/// consecutive blocks start this many frames apart.
pub const USABLE_BLOCK_FRAMES: usize = VISIBLE_BLOCK_PEAKS * PEAK_RATIO;

/// Low-resolution peak data for a whole waveform: per channel, one
/// contiguous buffer of (max,min) pairs stored flat.
#[derive(Debug, Clone, Default)]
pub struct PeakBuf {
    pub channels: Vec<Vec<i16>>,
}

impl PeakBuf {
    pub fn num_peaks(&self) -> usize {
        self.channels
            .first()
            .map(|c| c.len() / PEAK_VALUES_PER_SAMPLE)
            .unwrap_or(0)
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// The (max,min) pair for peak `i` on `channel`.
    pub fn pair(&self, channel: usize, i: usize) -> (i16, i16) {
        let chan = &self.channels[channel];
        (chan[2 * i], chan[2 * i + 1])
    }
}

/// Expected number of peak pairs for a frame count.
pub fn expected_peaks(n_frames: u64) -> u64 {
    n_frames.div_ceil(PEAK_RATIO as u64)
}
