//! Medium-resolution renderer: one 2-D alpha texture per block, built on
//! the CPU from the low-res peaks.

use std::collections::HashMap;

use super::alpha;
use super::gpu::{ShaderUniforms, TextureId, TexturedQuad};
use super::texture_cache::{TextureKey, TextureType, block_key};
use super::{ActorPaint, Mode, ModeRenderer, RenderCtx, block_geometry};
use crate::peak::{PEAK_TEXTURE_SIZE, VISIBLE_BLOCK_PEAKS};
use crate::waveform::WaveformId;

const TEX_HEIGHT: usize = 128;

pub struct MedRenderer {
    textures: HashMap<WaveformId, HashMap<usize, TextureId>>,
}

impl MedRenderer {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
        }
    }

    fn key(paint: &ActorPaint, block: usize) -> TextureKey {
        TextureKey {
            waveform: paint.waveform.id(),
            block: block_key(Mode::Med, block),
        }
    }

    fn build_alpha(paint: &ActorPaint, block: usize) -> Option<alpha::AlphaBuf> {
        paint.waveform.with_state(|state| {
            let peak = state.peak.as_ref()?;
            let pairs = alpha::downmix(peak);
            let first_peak = block * VISIBLE_BLOCK_PEAKS;
            if first_peak >= peak.num_peaks() {
                return None;
            }
            let n_peaks = PEAK_TEXTURE_SIZE.min(peak.num_peaks() - first_peak);
            Some(alpha::peaks_to_alpha(
                &pairs,
                first_peak,
                n_peaks,
                PEAK_TEXTURE_SIZE,
                TEX_HEIGHT,
                paint.v_gain,
            ))
        })
    }
}

impl ModeRenderer for MedRenderer {
    fn mode(&self) -> Mode {
        Mode::Med
    }

    fn load_block(&mut self, ctx: &mut RenderCtx, paint: &ActorPaint, block: usize) {
        let key = Self::key(paint, block);
        let slots = self.textures.entry(paint.waveform.id()).or_default();
        if let Some(&id) = slots.get(&block) {
            if ctx.textures.lookup(TextureType::TwoD, key) == Some(id) {
                ctx.textures.freshen(TextureType::TwoD, key);
                return;
            }
            slots.remove(&block);
        }
        let Some(alpha) = Self::build_alpha(paint, block) else {
            return;
        };
        let (id, stolen) = ctx.textures.assign_new(ctx.gpu, TextureType::TwoD, key);
        if let Some(stolen) = stolen {
            ctx.stolen.push(stolen);
        }
        ctx.gpu.upload_2d(id, alpha.width, alpha.height, &alpha.buf);
        slots.insert(block, id);
    }

    fn pre_render(&mut self, ctx: &mut RenderCtx, paint: &ActorPaint) -> bool {
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

    fn render_block(
        &mut self,
        ctx: &mut RenderCtx,
        paint: &ActorPaint,
        block: usize,
        _is_first: bool,
        _is_last: bool,
        x: f64,
    ) -> bool {
        let key = Self::key(paint, block);
        let mut id = ctx.textures.lookup(TextureType::TwoD, key);
        if id.is_none() {
            self.load_block(ctx, paint, block);
            id = ctx.textures.lookup(TextureType::TwoD, key);
        }
        let Some(id) = id else {
            return false;
        };
        let Some(geometry) = block_geometry(paint.info, Mode::Med, block, x) else {
            // outside the region: nothing to draw, but not a failure
            return true;
        };
        ctx.textures.freshen(TextureType::TwoD, key);
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

    fn free_waveform(&mut self, id: WaveformId) {
        self.textures.remove(&id);
    }

    fn on_steal(&mut self, key: &TextureKey, id: TextureId) {
        if let Some(slots) = self.textures.get_mut(&key.waveform) {
            slots.retain(|_, existing| *existing != id);
        }
    }
}

impl Default for MedRenderer {
    fn default() -> Self {
        Self::new()
    }
}
