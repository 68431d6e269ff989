//! The waveform actor: one rendered view of a waveform.
//!
//! An actor owns a region (the sample range it shows), a rect (the pixels
//! it covers), z and opacity, all animatable. The paint path memoises its
//! geometry in a [`RenderInfo`] that survives between frames and is
//! invalidated by any change to region, rect, viewport, zoom, or waveform
//! identity. Block loading considers both the current and the
//! transition-target geometry so data wanted mid-animation is requested
//! before it is first drawn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::peak::PEAK_RATIO;
use crate::render::{ActorPaint, Mode, ModeTable, RenderCtx, gpu::Rgba};
use crate::transition::{Member, Property, Transition};
use crate::waveform::{Waveform, audio};

/// A contiguous span of sample frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleRegion {
    pub start: i64,
    pub len: i64,
}

impl SampleRegion {
    pub fn new(start: i64, len: i64) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> i64 {
        self.start + self.len
    }
}

/// Horizontal pixel extent of an actor. Height and top follow the scene.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FloatRect {
    pub left: f32,
    pub right: f32,
}

impl FloatRect {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn len(&self) -> f32 {
        self.right - self.left
    }
}

/// A pixel-space rectangle (used for viewports).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl ViewRect {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// The frame clock and animation policy handed down by the scene.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    pub now: Instant,
    pub default_duration: Duration,
    pub animations_enabled: bool,
}

impl FrameClock {
    pub fn immediate(now: Instant) -> Self {
        Self {
            now,
            default_duration: Duration::ZERO,
            animations_enabled: false,
        }
    }
}

/// Memoised per-frame geometry, kept until something invalidates it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInfo {
    pub zoom: f64,
    pub mode: Mode,
    /// Frames covered by one block's texture, border included.
    pub block_span: usize,
    /// Frames by which consecutive blocks advance.
    pub usable_span: usize,
    pub region: SampleRegion,
    pub rect: FloatRect,
    /// First and last block to draw; `first > last` encodes an empty range.
    pub first_block: usize,
    pub last_block: usize,
    /// The blocks containing the region start and end; they get trimmed.
    pub region_start_block: usize,
    pub region_end_block: usize,
    /// Pixel width of one block step.
    pub block_wid: f64,
    /// Frames into the first region block at which drawing starts.
    pub first_offset: usize,
    pub first_offset_px: f64,
    pub peaks_per_pixel: f64,
    /// Viewport cropped to the actor, in scene pixels.
    pub viewport: ViewRect,
    pub cropped: bool,
}

impl RenderInfo {
    pub fn is_empty(&self) -> bool {
        self.first_block > self.last_block
    }

    /// Scene x of a block's start.
    pub fn block_x(&self, block: usize) -> f64 {
        self.rect.left as f64 + (block as f64 * self.usable_span as f64 - self.region.start as f64) * self.zoom
    }
}

pub struct WaveformActor {
    waveform: Option<Arc<Waveform>>,
    region: SampleRegion,
    region_model: SampleRegion,
    rect: FloatRect,
    rect_model: FloatRect,
    z: f32,
    z_model: f32,
    opacity: f32,
    opacity_model: f32,
    fg_colour: Rgba,
    v_gain: f32,
    transitions: Vec<Transition>,
    render_info: Option<RenderInfo>,
}

impl WaveformActor {
    pub fn new() -> Self {
        Self {
            waveform: None,
            region: SampleRegion::default(),
            region_model: SampleRegion::default(),
            rect: FloatRect::default(),
            rect_model: FloatRect::default(),
            z: 0.0,
            z_model: 0.0,
            opacity: 1.0,
            opacity_model: 1.0,
            fg_colour: Rgba::WHITE,
            v_gain: 1.0,
            transitions: Vec::new(),
            render_info: None,
        }
    }

    pub fn waveform(&self) -> Option<&Arc<Waveform>> {
        self.waveform.as_ref()
    }

    /// Swap the waveform shown by this actor, returning the previous one so
    /// the scene can purge its textures. Passing `None` empties the actor;
    /// a later `set_waveform` restores full function.
    pub fn set_waveform(&mut self, waveform: Option<Arc<Waveform>>) -> Option<Arc<Waveform>> {
        let old = std::mem::replace(&mut self.waveform, waveform);
        if let Some(w) = &self.waveform {
            let frames = w.n_frames() as i64;
            if self.region_model.len == 0 && frames > 0 {
                self.region_model = SampleRegion::new(0, frames);
                self.region = self.region_model;
            }
        }
        self.transitions.clear();
        self.invalidate();
        old
    }

    pub fn region(&self) -> SampleRegion {
        self.region
    }

    pub fn target_region(&self) -> SampleRegion {
        self.region_model
    }

    pub fn rect(&self) -> FloatRect {
        self.rect
    }

    pub fn target_rect(&self) -> FloatRect {
        self.rect_model
    }

    pub fn z(&self) -> f32 {
        self.z
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn colour(&self) -> Rgba {
        self.fg_colour
    }

    pub fn v_gain(&self) -> f32 {
        self.v_gain
    }

    pub fn has_transitions(&self) -> bool {
        !self.transitions.is_empty()
    }

    pub fn render_info(&self) -> Option<&RenderInfo> {
        self.render_info.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.render_info = None;
    }

    /// Animate to a new sample region. Setting the current region again is
    /// a no-op and starts no transition.
    pub fn set_region(&mut self, region: SampleRegion, clock: &FrameClock) {
        if region == self.region_model {
            return;
        }
        let mut members = Vec::new();
        if region.start != self.region_model.start {
            members.push(Member {
                property: Property::RegionStart,
                start: self.region.start as f64,
                target: region.start as f64,
            });
        }
        if region.len != self.region_model.len {
            members.push(Member {
                property: Property::RegionLen,
                start: self.region.len as f64,
                target: region.len as f64,
            });
        }
        self.region_model = region;
        self.start_transition(members, clock, clock.default_duration, None);
    }

    /// Animate to a new pixel rect.
    pub fn set_rect(&mut self, rect: FloatRect, clock: &FrameClock) {
        if rect == self.rect_model {
            return;
        }
        let mut members = Vec::new();
        if rect.left != self.rect_model.left {
            members.push(Member {
                property: Property::RectLeft,
                start: self.rect.left as f64,
                target: rect.left as f64,
            });
        }
        if rect.right != self.rect_model.right {
            members.push(Member {
                property: Property::RectRight,
                start: self.rect.right as f64,
                target: rect.right as f64,
            });
        }
        self.rect_model = rect;
        self.start_transition(members, clock, clock.default_duration, None);
    }

    /// Animate region and rect together over an explicit duration.
    pub fn set_full(
        &mut self,
        region: Option<SampleRegion>,
        rect: Option<FloatRect>,
        duration: Duration,
        clock: &FrameClock,
        on_finish: Option<Box<dyn FnOnce() + Send>>,
    ) {
        let mut members = Vec::new();
        if let Some(region) = region {
            if region != self.region_model {
                members.push(Member {
                    property: Property::RegionStart,
                    start: self.region.start as f64,
                    target: region.start as f64,
                });
                members.push(Member {
                    property: Property::RegionLen,
                    start: self.region.len as f64,
                    target: region.len as f64,
                });
                self.region_model = region;
            }
        }
        if let Some(rect) = rect {
            if rect != self.rect_model {
                members.push(Member {
                    property: Property::RectLeft,
                    start: self.rect.left as f64,
                    target: rect.left as f64,
                });
                members.push(Member {
                    property: Property::RectRight,
                    start: self.rect.right as f64,
                    target: rect.right as f64,
                });
                self.rect_model = rect;
            }
        }
        if members.is_empty() {
            if let Some(on_finish) = on_finish {
                on_finish();
            }
            return;
        }
        self.start_transition(members, clock, duration, on_finish);
    }

    pub fn set_z(&mut self, z: f32, clock: &FrameClock) {
        if z == self.z_model {
            return;
        }
        let member = Member {
            property: Property::Z,
            start: self.z as f64,
            target: z as f64,
        };
        self.z_model = z;
        self.start_transition(vec![member], clock, clock.default_duration, None);
    }

    /// Set the foreground colour; opacity is the alpha byte.
    pub fn set_colour(&mut self, colour: Rgba) {
        self.fg_colour = colour;
        self.opacity = colour.alpha_f32();
        self.opacity_model = self.opacity;
        self.invalidate();
    }

    pub fn set_vzoom(&mut self, gain: f32) {
        self.v_gain = gain.max(0.0);
        self.invalidate();
    }

    pub fn fade_in(&mut self, clock: &FrameClock) {
        let target = self.fg_colour.alpha_f32() as f64;
        self.opacity_model = target as f32;
        let member = Member {
            property: Property::Opacity,
            start: self.opacity as f64,
            target,
        };
        self.start_transition(vec![member], clock, clock.default_duration, None);
    }

    pub fn fade_out(&mut self, clock: &FrameClock) {
        self.opacity_model = 0.0;
        let member = Member {
            property: Property::Opacity,
            start: self.opacity as f64,
            target: 0.0,
        };
        self.start_transition(vec![member], clock, clock.default_duration, None);
    }

    /// Animate the region start, keeping its length.
    pub fn scroll_to(&mut self, start: i64, clock: &FrameClock) {
        let region = SampleRegion::new(start, self.region_model.len);
        self.set_region(region, clock);
    }

    /// Scene x of a sample frame, given the effective zoom.
    pub fn frame_to_x(&self, frame: i64, scene_zoom: Option<f64>) -> f64 {
        let zoom = self.effective_zoom(scene_zoom);
        self.rect.left as f64 + (frame - self.region.start) as f64 * zoom
    }

    /// Inverse of [`frame_to_x`].
    pub fn x_to_frame(&self, x: f64, scene_zoom: Option<f64>) -> i64 {
        let zoom = self.effective_zoom(scene_zoom);
        if zoom <= 0.0 {
            return self.region.start;
        }
        self.region.start + ((x - self.rect.left as f64) / zoom).round() as i64
    }

    fn effective_zoom(&self, scene_zoom: Option<f64>) -> f64 {
        scene_zoom.unwrap_or_else(|| {
            if self.region.len > 0 {
                self.rect.len() as f64 / self.region.len as f64
            } else {
                0.0
            }
        })
    }

    fn start_transition(
        &mut self,
        members: Vec<Member>,
        clock: &FrameClock,
        duration: Duration,
        on_finish: Option<Box<dyn FnOnce() + Send>>,
    ) {
        self.invalidate();
        if members.is_empty() {
            if let Some(on_finish) = on_finish {
                on_finish();
            }
            return;
        }

        // Displace the properties we are about to animate from any
        // transition already running.
        let properties: Vec<Property> = members.iter().map(|m| m.property).collect();
        self.transitions.retain_mut(|t| {
            if t.displace(&properties) {
                t.finish();
                false
            } else {
                true
            }
        });

        if !clock.animations_enabled || duration.is_zero() {
            for member in &members {
                self.apply(member.property, member.target);
            }
            if let Some(on_finish) = on_finish {
                on_finish();
            }
            return;
        }

        let mut transition = Transition::new(members, clock.now, duration);
        if let Some(on_finish) = on_finish {
            transition = transition.with_on_finish(on_finish);
        }
        self.transitions.push(transition);
    }

    fn apply(&mut self, property: Property, value: f64) {
        match property {
            Property::RegionStart => self.region.start = value.round() as i64,
            Property::RegionLen => self.region.len = value.round() as i64,
            Property::RectLeft => self.rect.left = value as f32,
            Property::RectRight => self.rect.right = value as f32,
            Property::Z => self.z = value as f32,
            Property::Opacity => self.opacity = value as f32,
        }
    }

    /// Advance running transitions. Returns true when anything moved.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.transitions.is_empty() {
            return false;
        }
        let mut finished = Vec::new();
        let mut writes: Vec<(Property, f64)> = Vec::new();
        for (idx, transition) in self.transitions.iter().enumerate() {
            let t = transition.progress(now);
            writes.extend(transition.sample_at(t));
            if transition.is_finished(now) {
                finished.push(idx);
            }
        }
        for (property, value) in writes {
            self.apply(property, value);
        }
        for idx in finished.into_iter().rev() {
            let mut transition = self.transitions.remove(idx);
            transition.finish();
        }
        self.invalidate();
        true
    }

    /// Recompute the cached render info if it is stale. `None` when the
    /// actor has no drawable geometry at all.
    pub fn update_render_info(
        &mut self,
        viewport: &ViewRect,
        scene_zoom: Option<f64>,
    ) -> Option<&RenderInfo> {
        if self.render_info.is_some() {
            return self.render_info.as_ref();
        }
        let info = self.compute_render_info(self.region, self.rect, viewport, scene_zoom)?;
        trace!(
            "render info: mode={:?} blocks={}..={} zoom={:.6}",
            info.mode, info.first_block, info.last_block, info.zoom
        );
        self.render_info = Some(info);
        self.render_info.as_ref()
    }

    fn compute_render_info(
        &self,
        region: SampleRegion,
        rect: FloatRect,
        viewport: &ViewRect,
        scene_zoom: Option<f64>,
    ) -> Option<RenderInfo> {
        let waveform = self.waveform.as_ref()?;
        if region.len <= 0 || rect.len() <= 0.0 {
            return None;
        }
        let zoom = scene_zoom.unwrap_or(rect.len() as f64 / region.len as f64);
        if zoom <= 0.0 || !zoom.is_finite() {
            return None;
        }
        let mode = Mode::at(zoom);
        let block_span = mode.block_span();
        let usable_span = mode.usable_samples_per_block();

        let vis_left = (rect.left as f64).max(viewport.left);
        let vis_right = (rect.right as f64).min(viewport.right);
        let cropped = vis_left > rect.left as f64 || vis_right < rect.right as f64;

        let n_frames = waveform.n_frames() as i64;
        let region_start = region.start.max(0);
        let region_end = if n_frames > 0 {
            region.end().min(n_frames)
        } else {
            region.end()
        };
        if region_end <= region_start {
            return None;
        }
        let region_start_block = (region_start / usable_span as i64).max(0) as usize;
        let region_end_block = ((region_end - 1).max(0) / usable_span as i64) as usize;

        let (first_block, last_block) = if vis_right <= vis_left {
            // nothing visible: a valid info with an empty block range
            (1, 0)
        } else {
            let first_frame = (region_start
                + ((vis_left - rect.left as f64) / zoom) as i64)
                .clamp(region_start, region_end - 1);
            let last_frame = (region_start
                + ((vis_right - rect.left as f64) / zoom) as i64)
                .clamp(first_frame, region_end - 1);
            let first = (first_frame / usable_span as i64) as usize;
            let last = (last_frame / usable_span as i64) as usize;
            (first.max(region_start_block), last.min(region_end_block))
        };

        let first_offset = (region_start - region_start_block as i64 * usable_span as i64) as usize;
        Some(RenderInfo {
            zoom,
            mode,
            block_span,
            usable_span,
            region: SampleRegion::new(region_start, region_end - region_start),
            rect,
            first_block,
            last_block,
            region_start_block,
            region_end_block,
            block_wid: usable_span as f64 * zoom,
            first_offset,
            first_offset_px: first_offset as f64 * zoom,
            peaks_per_pixel: 1.0 / (zoom * PEAK_RATIO as f64),
            viewport: ViewRect {
                left: vis_left,
                top: viewport.top,
                right: vis_right,
                bottom: viewport.bottom,
            },
            cropped,
        })
    }

    /// Draw the actor. Returns true when every visible block rendered at
    /// the mode the zoom asked for; false signals "try again next frame"
    /// (data still loading, empty range, or nothing to draw yet).
    pub fn paint(
        &mut self,
        ctx: &mut RenderCtx,
        modes: &mut ModeTable,
        viewport: &ViewRect,
        scene_zoom: Option<f64>,
    ) -> bool {
        let Some(waveform) = self.waveform.clone() else {
            return true;
        };
        if !waveform.is_renderable() {
            return true;
        }
        let top = viewport.top as f32;
        let height = viewport.height() as f32;
        let Some(info) = self
            .update_render_info(viewport, scene_zoom)
            .cloned()
        else {
            return false;
        };
        if info.is_empty() {
            return false;
        }

        let paint = ActorPaint {
            waveform: &waveform,
            info: &info,
            colour: self.fg_colour,
            opacity: self.opacity,
            v_gain: self.v_gain,
            top,
            height,
        };

        // Find the highest mode at or below the target that can render.
        let mut mode = info.mode;
        while !modes.renderer(mode).pre_render(ctx, &paint) {
            match mode.lower() {
                Some(lower) => mode = lower,
                None => return false,
            }
        }
        let pass_top_mode = mode;
        let mut complete = pass_top_mode == info.mode;
        let mut active_mode = pass_top_mode;

        for block in info.first_block..=info.last_block {
            // Blocks of coarser modes cover several target-mode blocks, so
            // index, position, and trim flags are recomputed per draw mode.
            let mut block_mode = pass_top_mode;
            if active_mode != block_mode {
                modes.renderer(block_mode).pre_render(ctx, &paint);
                active_mode = block_mode;
            }
            loop {
                let draw_block = scaled_block(info.mode, block_mode, block);
                let draw_span = block_mode.usable_samples_per_block() as i64;
                let x = self.rect.left as f64
                    + (draw_block as i64 * draw_span - info.region.start) as f64 * info.zoom;
                let is_first = draw_block as i64 == info.region.start / draw_span;
                let is_last = draw_block as i64 == (info.region.end() - 1) / draw_span;
                let renderer = modes.renderer(block_mode);
                if renderer.render_block(ctx, &paint, draw_block, is_first, is_last, x) {
                    if block_mode != info.mode {
                        complete = false;
                    }
                    break;
                }
                match block_mode.lower() {
                    Some(lower) => {
                        block_mode = lower;
                        modes.renderer(block_mode).pre_render(ctx, &paint);
                        active_mode = block_mode;
                    }
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
        }

        modes.renderer(active_mode).post_render(ctx);
        complete
    }

    /// Request every block the current *and* the transition-target
    /// geometry will need, so panning and zooming never wait for data that
    /// could have been loading already.
    pub fn load_missing_blocks(
        &mut self,
        ctx: &mut RenderCtx,
        modes: &mut ModeTable,
        viewport: &ViewRect,
        scene_zoom: Option<f64>,
    ) {
        let Some(waveform) = self.waveform.clone() else {
            return;
        };
        if !waveform.is_renderable() {
            return;
        }

        let spans = [
            (self.region, self.rect),
            (self.region_model, self.rect_model),
        ];
        let mut requested: Vec<(Mode, usize)> = Vec::new();
        for (region, rect) in spans {
            let Some(info) = self.compute_render_info(region, rect, viewport, scene_zoom) else {
                continue;
            };
            if info.is_empty() {
                continue;
            }
            for block in info.first_block..=info.last_block {
                if requested.contains(&(info.mode, block)) {
                    continue;
                }
                requested.push((info.mode, block));
                if info.mode.needs_audio() {
                    if block < waveform.n_audio_blocks() {
                        audio::load_audio(
                            &waveform,
                            block,
                            info.mode.min_output_tiers(),
                            |_, _| {},
                        );
                    }
                } else if waveform.peaks_loaded() {
                    let paint = ActorPaint {
                        waveform: &waveform,
                        info: &info,
                        colour: self.fg_colour,
                        opacity: self.opacity,
                        v_gain: self.v_gain,
                        top: viewport.top as f32,
                        height: viewport.height() as f32,
                    };
                    modes.renderer(info.mode).load_block(ctx, &paint, block);
                }
            }
        }
    }
}

impl Default for WaveformActor {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate a block index of `from` mode into the containing block of the
/// (coarser or equal) `to` mode.
fn scaled_block(from: Mode, to: Mode, block: usize) -> usize {
    if from == to {
        return block;
    }
    let from_span = from.usable_samples_per_block();
    let to_span = to.usable_samples_per_block();
    block * from_span / to_span
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> FrameClock {
        FrameClock {
            now: Instant::now(),
            default_duration: Duration::from_millis(300),
            animations_enabled: true,
        }
    }

    fn viewport() -> ViewRect {
        ViewRect {
            left: 0.0,
            top: 0.0,
            right: 1024.0,
            bottom: 256.0,
        }
    }

    fn actor_with_waveform(frames: u64) -> WaveformActor {
        let waveform = Waveform::new(std::path::Path::new("actor-test.wav"));
        waveform.with_state_mut(|s| {
            s.n_frames = frames;
            s.n_channels = 1;
            s.sample_rate = 44_100;
        });
        let mut actor = WaveformActor::new();
        actor.set_waveform(Some(waveform));
        actor
    }

    #[test]
    fn setting_a_waveform_defaults_region_to_the_whole_file() {
        let actor = actor_with_waveform(441_000);
        assert_eq!(actor.region(), SampleRegion::new(0, 441_000));
    }

    #[test]
    fn setting_the_same_region_twice_starts_no_transition() {
        let mut actor = actor_with_waveform(441_000);
        let clock = clock();
        actor.set_region(SampleRegion::new(100, 1_000), &clock);
        assert!(actor.has_transitions());
        actor.tick(clock.now + Duration::from_secs(1));
        assert!(!actor.has_transitions());

        actor.set_region(SampleRegion::new(100, 1_000), &clock);
        assert!(!actor.has_transitions());
    }

    #[test]
    fn transitions_interpolate_and_land_on_target() {
        let mut actor = actor_with_waveform(441_000);
        let clock = clock();
        actor.set_region(SampleRegion::new(0, 441_000), &clock); // no-op, same
        actor.scroll_to(100_000, &clock);

        actor.tick(clock.now + Duration::from_millis(150));
        let mid = actor.region().start;
        assert!(mid > 0 && mid < 100_000, "{mid}");

        actor.tick(clock.now + Duration::from_millis(400));
        assert_eq!(actor.region().start, 100_000);
        assert!(!actor.has_transitions());
    }

    #[test]
    fn overlapping_transition_displaces_the_property() {
        let mut actor = actor_with_waveform(441_000);
        let clock = clock();
        actor.scroll_to(100_000, &clock);
        actor.tick(clock.now + Duration::from_millis(150));
        let mid = actor.region().start;

        // Start a new scroll while the first is in flight: the new one
        // takes over from the transient value.
        let clock2 = FrameClock {
            now: clock.now + Duration::from_millis(150),
            ..clock
        };
        actor.scroll_to(0, &clock2);
        assert_eq!(actor.transitions.len(), 1);

        actor.tick(clock2.now + Duration::from_millis(1));
        assert!(actor.region().start <= mid);
        actor.tick(clock2.now + Duration::from_millis(400));
        assert_eq!(actor.region().start, 0);
    }

    #[test]
    fn disabled_animations_jump_straight_to_target() {
        let mut actor = actor_with_waveform(441_000);
        let clock = FrameClock {
            animations_enabled: false,
            ..clock()
        };
        actor.scroll_to(50_000, &clock);
        assert!(!actor.has_transitions());
        assert_eq!(actor.region().start, 50_000);
    }

    #[test]
    fn frame_to_x_round_trips_within_a_pixel() {
        let mut actor = actor_with_waveform(441_000);
        let clock = FrameClock::immediate(Instant::now());
        actor.set_rect(FloatRect::new(10.0, 1010.0), &clock);

        for px in [10.0, 123.0, 500.0, 1009.0] {
            let frame = actor.x_to_frame(px, None);
            let back = actor.frame_to_x(frame, None);
            assert!((back - px).abs() <= 1.0, "px={px} back={back}");
        }
        // scaled (scene-driven) zoom
        for px in [10.0, 777.0] {
            let frame = actor.x_to_frame(px, Some(0.01));
            let back = actor.frame_to_x(frame, Some(0.01));
            assert!((back - px).abs() <= 1.0, "px={px} back={back}");
        }
    }

    #[test]
    fn render_info_picks_blocks_from_the_viewport() {
        let mut actor = actor_with_waveform(441_000);
        let clock = FrameClock::immediate(Instant::now());
        actor.set_rect(FloatRect::new(0.0, 1024.0), &clock);

        let info = actor
            .update_render_info(&viewport(), None)
            .expect("render info")
            .clone();
        // 441000 frames over 1024 px: zoom ≈ 1/431 -> MED
        assert_eq!(info.mode, Mode::Med);
        assert_eq!(info.first_block, 0);
        assert_eq!(info.last_block, 441_000 / 64_512);
        assert!(!info.is_empty());
        assert!(info.block_wid > 0.0);
    }

    #[test]
    fn render_info_is_cached_until_invalidated() {
        let mut actor = actor_with_waveform(441_000);
        let clock = FrameClock::immediate(Instant::now());
        actor.set_rect(FloatRect::new(0.0, 1024.0), &clock);

        let a = actor.update_render_info(&viewport(), None).cloned().unwrap();
        let b = actor.update_render_info(&viewport(), None).cloned().unwrap();
        assert_eq!(a, b);

        actor.set_rect(FloatRect::new(0.0, 512.0), &clock);
        assert!(actor.render_info().is_none());
    }

    #[test]
    fn offscreen_actor_has_an_empty_block_range() {
        let mut actor = actor_with_waveform(441_000);
        let clock = FrameClock::immediate(Instant::now());
        actor.set_rect(FloatRect::new(2000.0, 3000.0), &clock);

        let info = actor.update_render_info(&viewport(), None).unwrap();
        assert!(info.is_empty());
    }

    #[test]
    fn empty_region_yields_no_render_info() {
        let mut actor = actor_with_waveform(441_000);
        let clock = FrameClock::immediate(Instant::now());
        actor.set_rect(FloatRect::new(0.0, 100.0), &clock);
        actor.set_region(SampleRegion::new(0, 0), &clock);
        assert!(actor.update_render_info(&viewport(), None).is_none());
    }

    #[test]
    fn scaled_block_maps_between_modes() {
        assert_eq!(scaled_block(Mode::Med, Mode::Med, 7), 7);
        let low_span = Mode::Low.usable_samples_per_block();
        let med_span = Mode::Med.usable_samples_per_block();
        let ratio = low_span / med_span;
        assert_eq!(scaled_block(Mode::Med, Mode::Low, ratio + 1), 1);
    }
}
