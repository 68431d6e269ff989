//! Sample-level renderer. No texture is uploaded; the decoded audio is
//! read from the block cache and drawn directly as a line strip per
//! channel. A block's drawing stops cleanly at the region boundary.

use super::texture_cache::TextureKey;
use super::gpu::TextureId;
use super::{ActorPaint, Mode, ModeRenderer, RenderCtx};
use crate::waveform::{WaveformId, audio};

pub struct VHiRenderer;

impl VHiRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ModeRenderer for VHiRenderer {
    fn mode(&self) -> Mode {
        Mode::VHi
    }

    fn load_block(&mut self, _ctx: &mut RenderCtx, _paint: &ActorPaint, _block: usize) {
        // audio loads are scheduled by the actor's missing-block pass
    }

    fn pre_render(&mut self, _ctx: &mut RenderCtx, _paint: &ActorPaint) -> bool {
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
        let Some(buf) = audio::audio_cache().get(paint.waveform.id(), block) else {
            return false;
        };

        let info = paint.info;
        let usable = Mode::VHi.usable_samples_per_block() as i64;
        let block_start = block as i64 * usable;

        // frames to draw: block ∩ region ∩ viewport
        let mut draw_start = block_start.max(info.region.start);
        let mut draw_end = (block_start + usable).min(info.region.end());
        let viewport_start = info.region.start
            + ((info.viewport.left - info.rect.left as f64) / info.zoom).floor() as i64;
        let viewport_end = info.region.start
            + ((info.viewport.right - info.rect.left as f64) / info.zoom).ceil() as i64;
        draw_start = draw_start.max(viewport_start);
        draw_end = draw_end.min(viewport_end + 1);
        if draw_end <= draw_start {
            return true;
        }

        let n_channels = buf.channels.len().max(1);
        let lane = paint.height / n_channels as f32;
        let colour = paint.colour.with_alpha((paint.opacity * 255.0) as u8);
        for (c, samples) in buf.channels.iter().enumerate() {
            let mid = paint.top + lane * (c as f32 + 0.5);
            let scale = paint.v_gain * (lane / 2.0) / 32768.0;
            let mut points = Vec::with_capacity((draw_end - draw_start) as usize);
            for frame in draw_start..draw_end {
                let index = (frame - block_start) as usize;
                let Some(&value) = samples.get(index) else {
                    break;
                };
                let px = x + (frame - block_start) as f64 * info.zoom;
                points.push((px as f32, mid - value as f32 * scale));
            }
            if points.len() > 1 {
                ctx.gpu.draw_lines(&points, colour);
            }
        }
        true
    }

    fn free_waveform(&mut self, _id: WaveformId) {}

    fn on_steal(&mut self, _key: &TextureKey, _id: TextureId) {}
}

impl Default for VHiRenderer {
    fn default() -> Self {
        Self::new()
    }
}
