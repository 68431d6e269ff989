//! Very-low-resolution renderer: the whole-file view. Identical plumbing
//! to LOW, at a block span sixteen times coarser.

use super::gpu::TextureId;
use super::low::PeakTexRenderer;
use super::texture_cache::TextureKey;
use super::{ActorPaint, Mode, ModeRenderer, RenderCtx};
use crate::waveform::WaveformId;

pub struct VLowRenderer {
    inner: PeakTexRenderer,
}

impl VLowRenderer {
    pub fn new() -> Self {
        Self {
            inner: PeakTexRenderer::new(Mode::VLow),
        }
    }
}

impl ModeRenderer for VLowRenderer {
    fn mode(&self) -> Mode {
        Mode::VLow
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

impl Default for VLowRenderer {
    fn default() -> Self {
        Self::new()
    }
}
