//! Level-of-detail selection and the per-mode renderers.
//!
//! Mode is a pure function of zoom (pixels per sample). Each mode defines a
//! texture span and a renderer; the actor walks its visible blocks and falls
//! through to the next lower mode whenever a block's data is not ready yet.

pub mod alpha;
pub mod gpu;
mod hi;
mod low;
mod med;
pub mod texture_cache;
mod v_hi;
mod v_low;

use std::sync::Arc;

use crate::peak::{PEAK_RATIO, PEAK_TEXTURE_SIZE, TEX_BORDER};
use crate::waveform::{Waveform, WaveformId};

use gpu::{Gpu, Rgba, TextureId};
use texture_cache::{Stolen, TextureCache, TextureKey};

pub use hi::HiRenderer;
pub use low::LowRenderer;
pub use med::MedRenderer;
pub use v_hi::VHiRenderer;
pub use v_low::VLowRenderer;

/// Zoom threshold (pixels per sample) above which each mode applies.
pub const ZOOM_V_HI: f64 = 1.0 / 16.0;
pub const ZOOM_HI: f64 = 1.0 / 256.0;
pub const ZOOM_MED: f64 = 1.0 / 4096.0;
pub const ZOOM_LOW: f64 = 1.0 / 65536.0;

/// Rendering modes, ordered lowest resolution first so that falling
/// through means stepping down the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    VLow,
    Low,
    Med,
    Hi,
    VHi,
}

pub const N_MODES: usize = 5;

impl Mode {
    /// Pick the mode for a zoom level (pixels per sample).
    pub fn at(zoom: f64) -> Mode {
        if zoom >= ZOOM_V_HI {
            Mode::VHi
        } else if zoom >= ZOOM_HI {
            Mode::Hi
        } else if zoom >= ZOOM_MED {
            Mode::Med
        } else if zoom >= ZOOM_LOW {
            Mode::Low
        } else {
            Mode::VLow
        }
    }

    pub fn index(self) -> usize {
        match self {
            Mode::VLow => 0,
            Mode::Low => 1,
            Mode::Med => 2,
            Mode::Hi => 3,
            Mode::VHi => 4,
        }
    }

    pub fn lower(self) -> Option<Mode> {
        match self {
            Mode::VLow => None,
            Mode::Low => Some(Mode::VLow),
            Mode::Med => Some(Mode::Low),
            Mode::Hi => Some(Mode::Med),
            Mode::VHi => Some(Mode::Hi),
        }
    }

    /// Source samples covered by one texture in this mode.
    pub fn samples_per_texture(self) -> usize {
        match self {
            Mode::VLow => PEAK_RATIO * 16_384,
            Mode::Low => PEAK_RATIO * 1_024,
            Mode::Med | Mode::Hi => PEAK_RATIO * PEAK_TEXTURE_SIZE,
            Mode::VHi => PEAK_RATIO,
        }
    }

    /// Frames per render block. V_HI uploads no textures and walks the
    /// audio blocks directly, so its block span stays at the audio block
    /// size even though a texture would only cover 256 samples.
    pub fn block_span(self) -> usize {
        match self {
            Mode::VHi => PEAK_RATIO * PEAK_TEXTURE_SIZE,
            other => other.samples_per_texture(),
        }
    }

    /// Frames by which consecutive blocks of this mode advance; the border
    /// overlap on either side belongs to the neighbouring blocks.
    pub fn usable_samples_per_block(self) -> usize {
        let span = self.block_span();
        span - 2 * border_frames(span)
    }

    /// How many medium-resolution blocks one block of this mode spans.
    pub fn med_blocks_per_block(self) -> usize {
        match self {
            Mode::VLow => 64,
            Mode::Low => 4,
            _ => 1,
        }
    }

    /// The minimum hi-res tier requested when loading audio for this mode.
    pub fn min_output_tiers(self) -> u32 {
        match self {
            Mode::VHi => 4,
            _ => 3,
        }
    }

    /// Whether this mode reads decoded audio rather than the peakfile.
    pub fn needs_audio(self) -> bool {
        matches!(self, Mode::Hi | Mode::VHi)
    }
}

/// Border width in frames for a texture spanning `samples_per_texture`.
pub fn border_frames(samples_per_texture: usize) -> usize {
    TEX_BORDER * samples_per_texture / PEAK_TEXTURE_SIZE
}

/// Resources a renderer may touch during a paint pass. Stolen texture slots
/// accumulate here and are dispatched to their owners after the pass.
pub struct RenderCtx<'a> {
    pub gpu: &'a mut dyn Gpu,
    pub textures: &'a mut TextureCache,
    pub stolen: Vec<Stolen>,
}

impl<'a> RenderCtx<'a> {
    pub fn new(gpu: &'a mut dyn Gpu, textures: &'a mut TextureCache) -> Self {
        Self {
            gpu,
            textures,
            stolen: Vec::new(),
        }
    }
}

/// Snapshot of the actor state a renderer needs for one pass.
pub struct ActorPaint<'a> {
    pub waveform: &'a Arc<Waveform>,
    pub info: &'a crate::actor::RenderInfo,
    pub colour: Rgba,
    pub opacity: f32,
    pub v_gain: f32,
    pub top: f32,
    pub height: f32,
}

/// The capability set every LOD renderer implements.
///
/// `pre_render` and `render_block` return false to signal "not ready";
/// the actor then drops one mode and retries, which is the normal
/// handshake while hi-res data is still being produced.
pub trait ModeRenderer {
    fn mode(&self) -> Mode;

    /// Ensure the GPU texture (or other per-block data) for `block` exists.
    fn load_block(&mut self, ctx: &mut RenderCtx, paint: &ActorPaint, block: usize);

    /// Bind per-pass state. False means the whole mode is unusable this frame.
    fn pre_render(&mut self, ctx: &mut RenderCtx, paint: &ActorPaint) -> bool;

    /// Draw one block at pixel offset `x` (actor-local). False means this
    /// block is not ready in this mode.
    fn render_block(
        &mut self,
        ctx: &mut RenderCtx,
        paint: &ActorPaint,
        block: usize,
        is_first: bool,
        is_last: bool,
        x: f64,
    ) -> bool;

    fn post_render(&mut self, _ctx: &mut RenderCtx) {}

    /// Drop all per-waveform render data for `id`.
    fn free_waveform(&mut self, id: WaveformId);

    /// A texture id this renderer may have cached was reclaimed.
    fn on_steal(&mut self, _key: &TextureKey, _id: TextureId) {}
}

/// The fixed renderer table, one entry per mode.
pub struct ModeTable {
    renderers: [Box<dyn ModeRenderer>; N_MODES],
}

impl ModeTable {
    pub fn new() -> Self {
        Self {
            renderers: [
                Box::new(VLowRenderer::new()),
                Box::new(LowRenderer::new()),
                Box::new(MedRenderer::new()),
                Box::new(HiRenderer::new()),
                Box::new(VHiRenderer::new()),
            ],
        }
    }

    pub fn renderer(&mut self, mode: Mode) -> &mut dyn ModeRenderer {
        self.renderers[mode.index()].as_mut()
    }

    /// Route stolen texture slots to the renderers that own them.
    pub fn dispatch_stolen(&mut self, stolen: &[Stolen]) {
        for entry in stolen {
            let mode = texture_cache::mode_of_key(entry.key.block);
            self.renderer(mode).on_steal(&entry.key, entry.id);
        }
    }

    pub fn free_waveform(&mut self, id: WaveformId) {
        for renderer in &mut self.renderers {
            renderer.free_waveform(id);
        }
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Screen and texture extent of one block, trimmed to the region.
///
/// `x` is the scene position of the block start (frame `block * usable`).
/// The texture for a block covers `block_span` frames from the same start;
/// the trailing `2 * border` frames overlap the next block so linear
/// sampling stays continuous at the right edge.
pub(crate) struct BlockGeometry {
    pub x: f64,
    pub width: f64,
    pub tex_left: f32,
    pub tex_right: f32,
}

pub(crate) fn block_geometry(
    info: &crate::actor::RenderInfo,
    mode: Mode,
    block: usize,
    x: f64,
) -> Option<BlockGeometry> {
    let span = mode.block_span() as f64;
    let usable = mode.usable_samples_per_block() as f64;
    let block_start = block as f64 * usable;
    let draw_start = block_start.max(info.region.start as f64);
    let draw_end = (block_start + usable).min(info.region.end() as f64);
    if draw_end <= draw_start {
        return None;
    }
    Some(BlockGeometry {
        x: x + (draw_start - block_start) * info.zoom,
        width: (draw_end - draw_start) * info.zoom,
        tex_left: ((draw_start - block_start) / span) as f32,
        tex_right: ((draw_end - block_start) / span) as f32,
    })
}

/// Downsample a span of low-res peak pairs into `out_pairs` pairs.
/// Shared by the LOW and V_LOW texture builders.
pub(crate) fn downsample_peaks(
    pairs: &[i16],
    first_peak: usize,
    n_peaks: usize,
    out_pairs: usize,
) -> Vec<(i16, i16)> {
    let mut out = vec![(0_i16, 0_i16); out_pairs];
    if out_pairs == 0 {
        return out;
    }
    let per_out = n_peaks.div_ceil(out_pairs).max(1);
    let total = pairs.len() / 2;
    for (i, slot) in out.iter_mut().enumerate() {
        let start = first_peak + i * per_out;
        let end = (start + per_out).min(first_peak + n_peaks).min(total);
        for p in start..end {
            slot.0 = slot.0.max(pairs[2 * p]);
            slot.1 = slot.1.min(pairs[2 * p + 1]);
        }
    }
    out
}
