//! Low-resolution renderer: the low-res peaks are downsampled into 1-D
//! textures, one per block, and expanded by the peak shader at draw time.
//! The same machinery serves V_LOW at a coarser block span.

use std::collections::HashMap;

use super::alpha;
use super::gpu::{ShaderUniforms, TextureId, TexturedQuad};
use super::texture_cache::{TextureKey, TextureType, block_key};
use super::{ActorPaint, Mode, ModeRenderer, RenderCtx, block_geometry, downsample_peaks};
use crate::peak::{PEAK_RATIO, PEAK_TEXTURE_SIZE};
use crate::waveform::WaveformId;

/// Shared implementation for the two downsampled 1-D texture modes.
pub(super) struct PeakTexRenderer {
    mode: Mode,
    textures: HashMap<WaveformId, HashMap<usize, TextureId>>,
}

impl PeakTexRenderer {
    pub(super) fn new(mode: Mode) -> Self {
        Self {
            mode,
            textures: HashMap::new(),
        }
    }

    fn key(&self, paint: &ActorPaint, block: usize) -> TextureKey {
        TextureKey {
            waveform: paint.waveform.id(),
            block: block_key(self.mode, block),
        }
    }

    /// Texture payload: 256 max magnitudes then 256 min magnitudes.
    fn build_texture(&self, paint: &ActorPaint, block: usize) -> Option<Vec<u8>> {
        paint.waveform.with_state(|state| {
            let peak = state.peak.as_ref()?;
            let pairs = alpha::downmix(peak);
            let peaks_per_block = self.mode.block_span() / PEAK_RATIO;
            let first_peak = block * (self.mode.usable_samples_per_block() / PEAK_RATIO);
            if first_peak >= peak.num_peaks() {
                return None;
            }
            let n_peaks = peaks_per_block.min(peak.num_peaks() - first_peak);
            let out = downsample_peaks(&pairs, first_peak, n_peaks, PEAK_TEXTURE_SIZE);

            let mut data = Vec::with_capacity(PEAK_TEXTURE_SIZE * 2);
            data.extend(out.iter().map(|&(max, _)| (max.max(0) >> 7) as u8));
            data.extend(out.iter().map(|&(_, min)| (min.saturating_neg().max(0) >> 7) as u8));
            Some(data)
        })
    }

    pub(super) fn load_block(&mut self, ctx: &mut RenderCtx, paint: &ActorPaint, block: usize) {
        let key = self.key(paint, block);
        if let Some(&id) = self
            .textures
            .get(&paint.waveform.id())
            .and_then(|slots| slots.get(&block))
        {
            if ctx.textures.lookup(TextureType::OneD, key) == Some(id) {
                ctx.textures.freshen(TextureType::OneD, key);
                return;
            }
            self.textures
                .get_mut(&paint.waveform.id())
                .unwrap()
                .remove(&block);
        }
        let Some(data) = self.build_texture(paint, block) else {
            return;
        };
        let (id, stolen) = ctx.textures.assign_new(ctx.gpu, TextureType::OneD, key);
        if let Some(stolen) = stolen {
            ctx.stolen.push(stolen);
        }
        ctx.gpu.upload_1d(id, &data);
        self.textures
            .entry(paint.waveform.id())
            .or_default()
            .insert(block, id);
    }

    pub(super) fn pre_render(&mut self, ctx: &mut RenderCtx, paint: &ActorPaint) -> bool {
        if !paint.waveform.peaks_loaded() {
            return false;
        }
        ctx.gpu.set_uniforms(&ShaderUniforms {
            colour: paint.colour,
            top: paint.top,
            bottom: paint.top + paint.height,
            n_channels: paint.waveform.n_channels(),
            peaks_per_pixel: paint.info.peaks_per_pixel as f32,
            v_gain: paint.v_gain,
            mip_level: 0,
        });
        true
    }

    pub(super) fn render_block(
        &mut self,
        ctx: &mut RenderCtx,
        paint: &ActorPaint,
        block: usize,
        x: f64,
    ) -> bool {
        let key = self.key(paint, block);
        let mut id = ctx.textures.lookup(TextureType::OneD, key);
        if id.is_none() {
            self.load_block(ctx, paint, block);
            id = ctx.textures.lookup(TextureType::OneD, key);
        }
        let Some(id) = id else {
            return false;
        };
        let Some(geometry) = block_geometry(paint.info, self.mode, block, x) else {
            return true;
        };
        ctx.textures.freshen(TextureType::OneD, key);
        ctx.gpu.draw_quad(&TexturedQuad {
            texture: id,
            x: geometry.x as f32,
            y: paint.top,
            width: geometry.width as f32,
            height: paint.height,
            tex_left: geometry.tex_left,
            tex_right: geometry.tex_right,
            colour: paint
                .colour
                .with_alpha((paint.opacity * 255.0) as u8),
        });
        true
    }

    pub(super) fn free_waveform(&mut self, id: WaveformId) {
        self.textures.remove(&id);
    }

    pub(super) fn on_steal(&mut self, key: &TextureKey, id: TextureId) {
        if let Some(slots) = self.textures.get_mut(&key.waveform) {
            slots.retain(|_, existing| *existing != id);
        }
    }
}

pub struct LowRenderer {
    inner: PeakTexRenderer,
}

impl LowRenderer {
    pub fn new() -> Self {
        Self {
            inner: PeakTexRenderer::new(Mode::Low),
        }
    }
}

impl ModeRenderer for LowRenderer {
    fn mode(&self) -> Mode {
        Mode::Low
    }

    fn load_block(&mut self, ctx: &mut RenderCtx, paint: &ActorPaint, block: usize) {
        self.inner.load_block(ctx, paint, block);
    }

    fn pre_render(&mut self, ctx: &mut RenderCtx, paint: &ActorPaint) -> bool {
        self.inner.pre_render(ctx, paint)
    }

    fn render_block(
        &mut self,
        ctx: &mut RenderCtx,
        paint: &ActorPaint,
        block: usize,
        _is_first: bool,
        _is_last: bool,
        x: f64,
    ) -> bool {
        self.inner.render_block(ctx, paint, block, x)
    }

    fn free_waveform(&mut self, id: WaveformId) {
        self.inner.free_waveform(id);
    }

    fn on_steal(&mut self, key: &TextureKey, id: TextureId) {
        self.inner.on_steal(key, id);
    }
}

impl Default for LowRenderer {
    fn default() -> Self {
        Self::new()
    }
}
