//! CPU rasterisation of peaks into alpha buffers and RGBA pixbufs.
//!
//! Used for the medium-resolution texture uploads, for thumbnails, and as
//! the whole render path when no GPU is available. Peaks are drawn with a
//! three-line sub-pixel accumulator (previous / current / next) and up to
//! four sorted intensity bands per column, which anti-aliases the peak
//! fills without a full supersampling pass.

use crate::peak::{PEAK_BLOCK_SIZE, PEAK_RATIO, PEAK_VALUES_PER_SAMPLE, PeakBuf, USABLE_BLOCK_FRAMES};
use crate::waveform::{PeakBlock, Waveform};

use super::gpu::Rgba;

/// An 8-bit alpha raster.
#[derive(Debug, Clone)]
pub struct AlphaBuf {
    pub width: usize,
    pub height: usize,
    pub buf: Vec<u8>,
}

impl AlphaBuf {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            buf: vec![0; width * height],
        }
    }

    fn composite_column(&mut self, x: usize, line: &[u8]) {
        if x >= self.width {
            return;
        }
        for (y, &alpha) in line.iter().enumerate().take(self.height) {
            let px = &mut self.buf[y * self.width + x];
            *px = (*px).max(alpha);
        }
    }
}

/// An RGBA8 raster.
#[derive(Debug, Clone)]
pub struct Pixbuf {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

struct Line {
    a: Vec<u8>,
}

impl Line {
    fn new(height: usize) -> Self {
        Self {
            a: vec![0; height],
        }
    }

    fn clear(&mut self) {
        self.a.fill(0);
    }

    fn write(&mut self, y: isize, alpha: u8) {
        if y >= 0 && (y as usize) < self.a.len() {
            let slot = &mut self.a[y as usize];
            *slot = (*slot).max(alpha);
        }
    }
}

/// Sort up to four sub-column extremes into descending magnitude order.
fn sort_desc(values: &mut [i32]) {
    values.sort_unstable_by(|a, b| b.cmp(a));
}

/// Rasterise one channel of peak pairs into an alpha buffer.
///
/// `pairs` is the flat (max,min) stream; `first_peak..first_peak+n_peaks`
/// is the span to draw; `gain` scales vertically.
pub fn peaks_to_alpha(
    pairs: &[i16],
    first_peak: usize,
    n_peaks: usize,
    width: usize,
    height: usize,
    gain: f32,
) -> AlphaBuf {
    let mut out = AlphaBuf::new(width, height);
    if width == 0 || height == 0 || n_peaks == 0 {
        return out;
    }
    let total_pairs = pairs.len() / PEAK_VALUES_PER_SAMPLE;
    let mid = height as f32 / 2.0;
    let scale = gain * mid / 32768.0;
    let peaks_per_px = n_peaks as f32 / width as f32;

    // Three rotating lines: the column being displayed sits between the one
    // just written and the one about to be written, so sub-pixel energy
    // bleeds into both neighbours.
    let mut lines = [Line::new(height), Line::new(height), Line::new(height)];

    for x in 0..width + 1 {
        let line_index = x % 3;
        lines[(line_index + 2) % 3].clear();

        if x < width {
            let p_start = first_peak + (x as f32 * peaks_per_px) as usize;
            let p_end = (first_peak + ((x + 1) as f32 * peaks_per_px) as usize)
                .max(p_start + 1)
                .min(total_pairs);

            // Up to four sub-column samples feed the banding.
            let mut maxes = [0_i32; 4];
            let mut mins = [0_i32; 4];
            let sub_px = (p_end.saturating_sub(p_start)).min(4);
            for (i, p) in (p_start..p_end).enumerate() {
                let slot = i % 4;
                maxes[slot] = maxes[slot].max(pairs[2 * p] as i32);
                mins[slot] = mins[slot].max(-(pairs[2 * p + 1] as i32));
            }

            let next = &mut lines[(line_index + 2) % 3];
            if sub_px > 0 {
                sort_desc(&mut maxes[..sub_px]);
                sort_desc(&mut mins[..sub_px]);

                // Positive bands: strongest value gets full intensity, each
                // weaker band two thirds of the previous.
                let mut alpha = 0xff_u32;
                for s in (1..sub_px).rev() {
                    let from = (maxes[s] as f32 * scale) as isize;
                    let to = (maxes[s - 1] as f32 * scale) as isize;
                    for y in from..=to {
                        next.write(mid as isize - y, alpha as u8);
                    }
                    alpha = alpha * 2 / 3;
                }
                for y in 0..=((maxes[sub_px - 1] as f32 * scale) as isize) {
                    next.write(mid as isize - y, 0xff);
                }
                // blur the line end
                next.write(
                    mid as isize - (maxes[0] as f32 * scale) as isize - 1,
                    (alpha / 2) as u8,
                );

                let mut alpha = 0xff_u32;
                for s in (1..sub_px).rev() {
                    let from = (mins[s] as f32 * scale) as isize;
                    let to = (mins[s - 1] as f32 * scale) as isize;
                    for y in from..=to {
                        next.write(mid as isize + y, alpha as u8);
                    }
                    alpha = alpha * 2 / 3;
                }
                for y in 0..=((mins[sub_px - 1] as f32 * scale) as isize) {
                    next.write(mid as isize + y, 0xff);
                }
                next.write(
                    mid as isize + (mins[0] as f32 * scale) as isize + 1,
                    (alpha / 2) as u8,
                );
            }
        }

        // The column one behind is complete once its right neighbour has
        // been written.
        if x >= 1 {
            let current = &lines[(line_index + 1) % 3];
            out.composite_column(x - 1, &current.a);
        }
    }

    out
}

/// Tint an alpha raster into an RGBA pixbuf.
pub fn alpha_to_pixbuf(alpha: &AlphaBuf, colour: Rgba) -> Pixbuf {
    let mut rgba = Vec::with_capacity(alpha.buf.len() * 4);
    for &a in &alpha.buf {
        rgba.push(colour.r);
        rgba.push(colour.g);
        rgba.push(colour.b);
        rgba.push(((a as u16 * colour.a as u16) / 255) as u8);
    }
    Pixbuf {
        width: alpha.width,
        height: alpha.height,
        rgba,
    }
}

/// Render a span of a waveform's low-res peaks straight to a pixbuf.
/// Channels are downmixed by per-peak extrema.
pub fn peaks_to_pixbuf(
    peak: &PeakBuf,
    first_peak: usize,
    n_peaks: usize,
    width: usize,
    height: usize,
    colour: Rgba,
    gain: f32,
) -> Pixbuf {
    let pairs = downmix(peak);
    let alpha = peaks_to_alpha(&pairs, first_peak, n_peaks, width, height, gain);
    alpha_to_pixbuf(&alpha, colour)
}

/// Rasterise one channel of a hi-res peak block.
pub fn peak_block_to_alpha(
    peaks: &PeakBlock,
    channel: usize,
    first_pair: usize,
    n_pairs: usize,
    width: usize,
    height: usize,
    gain: f32,
) -> Option<AlphaBuf> {
    let pairs = peaks.channels.get(channel)?;
    Some(peaks_to_alpha(pairs, first_pair, n_pairs, width, height, gain))
}

/// Render a frame span of a waveform straight to an RGBA pixbuf on the
/// CPU. Thumbnailing and GPU-less embedders come through here.
///
/// A span that fits inside a single block is drawn from the hi-res peaks
/// when they have been derived; everything else uses the low-res peaks,
/// which must be loaded. `None` when neither source covers the span.
pub fn waveform_to_pixbuf(
    waveform: &Waveform,
    first_frame: u64,
    n_frames: u64,
    width: usize,
    height: usize,
    colour: Rgba,
    gain: f32,
) -> Option<Pixbuf> {
    if n_frames == 0 || width == 0 || height == 0 {
        return None;
    }
    if let Some(pixbuf) =
        hires_span_to_pixbuf(waveform, first_frame, n_frames, width, height, colour, gain)
    {
        return Some(pixbuf);
    }
    waveform.with_state(|state| {
        let peak = state.peak.as_ref()?;
        let first_peak = first_frame as usize / PEAK_RATIO;
        if first_peak >= peak.num_peaks() {
            return None;
        }
        let n_peaks = (n_frames as usize)
            .div_ceil(PEAK_RATIO)
            .min(peak.num_peaks() - first_peak);
        Some(peaks_to_pixbuf(
            peak, first_peak, n_peaks, width, height, colour, gain,
        ))
    })
}

/// The short-span path: one block, hi-res peaks, channels max-merged.
fn hires_span_to_pixbuf(
    waveform: &Waveform,
    first_frame: u64,
    n_frames: u64,
    width: usize,
    height: usize,
    colour: Rgba,
    gain: f32,
) -> Option<Pixbuf> {
    let block = first_frame as usize / USABLE_BLOCK_FRAMES;
    let block_start = (block * USABLE_BLOCK_FRAMES) as u64;
    if first_frame + n_frames > block_start + PEAK_BLOCK_SIZE as u64 {
        return None;
    }
    let peaks = waveform.hires_peak(block)?;
    let resolution = peaks.resolution.max(1) as u64;
    let first_pair = ((first_frame - block_start) / resolution) as usize;
    let n_pairs = n_frames.div_ceil(resolution) as usize;

    let mut merged: Option<AlphaBuf> = None;
    for channel in 0..peaks.channels.len() {
        let alpha =
            peak_block_to_alpha(&peaks, channel, first_pair, n_pairs, width, height, gain)?;
        merged = Some(match merged {
            None => alpha,
            Some(mut acc) => {
                for (dst, src) in acc.buf.iter_mut().zip(&alpha.buf) {
                    *dst = (*dst).max(*src);
                }
                acc
            }
        });
    }
    merged.map(|alpha| alpha_to_pixbuf(&alpha, colour))
}

/// Collapse the channels of a peak buffer into one pair stream.
pub(crate) fn downmix(peak: &PeakBuf) -> Vec<i16> {
    match peak.channels.len() {
        0 => Vec::new(),
        1 => peak.channels[0].clone(),
        _ => {
            let n = peak.num_peaks();
            let mut out = vec![0_i16; n * 2];
            for i in 0..n {
                let mut max = i16::MIN;
                let mut min = i16::MAX;
                for chan in &peak.channels {
                    max = max.max(chan[2 * i]);
                    min = min.min(chan[2 * i + 1]);
                }
                out[2 * i] = max;
                out[2 * i + 1] = min;
            }
            out
        }
    }
}
