//! Hi-resolution renderer.
//!
//! Peak data is handed to the shader in a 2-D texture, four rows per
//! channel per block:
//!
//!   - row 0: max values at the block's full peak resolution
//!   - row 1: max values repeated at progressively lower x resolution
//!   - row 2: min values
//!   - row 3: min values, reduced as row 1
//!
//! The reduced rows act as a mipmap chain the shader can select by zoom.
//! Blocks appear as their audio is decoded; until then `render_block`
//! reports not-ready and the actor falls through to MED.

use std::collections::HashMap;

use super::gpu::{ShaderUniforms, TextureId, TexturedQuad};
use super::texture_cache::{TextureKey, TextureType, block_key};
use super::{ActorPaint, Mode, ModeRenderer, RenderCtx, block_geometry};
use crate::waveform::{PeakBlock, WaveformId};

const ROWS_PER_PEAK_TYPE: usize = 2;

pub struct HiRenderer {
    textures: HashMap<WaveformId, HashMap<usize, TextureId>>,
}

impl HiRenderer {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
        }
    }

    fn key(paint: &ActorPaint, block: usize) -> TextureKey {
        TextureKey {
            waveform: paint.waveform.id(),
            block: block_key(Mode::Hi, block),
        }
    }

    /// Pack one peak block into rows of 8-bit magnitudes.
    fn pack(peaks: &PeakBlock) -> (usize, usize, Vec<u8>) {
        let width = peaks.n_pairs();
        let height = peaks.channels.len() * 2 * ROWS_PER_PEAK_TYPE;
        let mut data = vec![0_u8; width * height];

        for (c, _) in peaks.channels.iter().enumerate() {
            let base = c * 2 * ROWS_PER_PEAK_TYPE;
            for i in 0..width {
                let (max, min) = peaks.pair(c, i);
                data[base * width + i] = (max.max(0) >> 7) as u8;
                data[(base + 2) * width + i] = (min.saturating_neg().max(0) >> 7) as u8;
            }
            // reduced rows: halved resolutions packed back to back
            for row_offset in [1_usize, 3] {
                let source_row = row_offset - 1;
                let mut out = 0;
                let mut step = 2;
                while out < width && step <= width {
                    let n = width / step;
                    for i in 0..n {
                        if out + i >= width {
                            break;
                        }
                        let mut level = 0_u8;
                        for s in 0..step {
                            level = level.max(data[(base + source_row) * width + i * step + s]);
                        }
                        data[(base + row_offset) * width + out + i] = level;
                    }
                    out += n;
                    step *= 2;
                }
            }
        }
        (width, height, data)
    }
}

impl ModeRenderer for HiRenderer {
    fn mode(&self) -> Mode {
        Mode::Hi
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
        let Some(peaks) = paint.waveform.hires_peak(block) else {
            return;
        };
        let (width, height, data) = Self::pack(&peaks);
        if width == 0 {
            return;
        }
        let (id, stolen) = ctx.textures.assign_new(ctx.gpu, TextureType::TwoD, key);
        if let Some(stolen) = stolen {
            ctx.stolen.push(stolen);
        }
        ctx.gpu.upload_2d(id, width, height, &data);
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
            mip_level: mip_level_for(paint.info.zoom),
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
            // the hi-res peaks may have arrived since the last frame
            self.load_block(ctx, paint, block);
            id = ctx.textures.lookup(TextureType::TwoD, key);
        }
        let Some(id) = id else {
            return false;
        };
        let Some(geometry) = block_geometry(paint.info, Mode::Hi, block, x) else {
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

impl Default for HiRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Which reduced row the shader should sample at this zoom.
fn mip_level_for(zoom: f64) -> u32 {
    // at 1/256 px per sample a full-res row is one texel per 16 px
    if zoom >= 1.0 / 64.0 { 0 } else { 1 }
}
