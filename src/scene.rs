//! The rendering root: viewport, zoom/pan state, the actor arena, the
//! texture cache and renderer table, and the queued-redraw plumbing.
//!
//! There is no toolkit event loop here. The embedding application calls
//! [`Scene::tick`] once per frame (which drains worker completions and
//! advances transitions) and [`Scene::paint_all`] with its GPU; whichever
//! thread does that is the main thread everything else refers to.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::actor::{FloatRect, FrameClock, SampleRegion, ViewRect, WaveformActor};
use crate::config::Config;
use crate::error::WaveformError;
use crate::render::gpu::{Gpu, Rgba};
use crate::render::texture_cache::TextureCache;
use crate::render::{ModeTable, RenderCtx};
use crate::waveform::Waveform;
use crate::worker;

/// Stable handle to an actor in the scene's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId(usize);

/// Scene-driven zoom: pixels per sample plus a scroll origin, both
/// animated on the scene clock rather than per actor.
struct ScaledZoom {
    pixels_per_sample: f64,
    scroll_start: f64,
    zoom_anim: Option<ScalarAnim>,
    scroll_anim: Option<ScalarAnim>,
}

struct ScalarAnim {
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl ScalarAnim {
    fn value_at(&self, now: Instant) -> (f64, bool) {
        if self.duration.is_zero() {
            return (self.to, true);
        }
        let t = (now.saturating_duration_since(self.started).as_secs_f64()
            / self.duration.as_secs_f64())
        .clamp(0.0, 1.0);
        (self.from + (self.to - self.from) * t, t >= 1.0)
    }
}

pub struct Scene {
    config: Config,
    viewport: ViewRect,
    sample_rate: u32,
    scaled_zoom: Option<ScaledZoom>,
    actors: Vec<Option<WaveformActor>>,
    textures: TextureCache,
    modes: ModeTable,
    animations_enabled: bool,
    redraw_queued: bool,
    redraw_callback: Option<Box<dyn FnMut()>>,
}

impl Scene {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_config(Config::default(), sample_rate)
    }

    pub fn with_config(config: Config, sample_rate: u32) -> Self {
        config.apply_global();
        Self {
            viewport: ViewRect {
                left: 0.0,
                top: 0.0,
                right: 1024.0,
                bottom: 256.0,
            },
            sample_rate,
            scaled_zoom: None,
            actors: Vec::new(),
            textures: TextureCache::new(config.texture_cache_max),
            modes: ModeTable::new(),
            animations_enabled: config.animations_enabled,
            redraw_queued: false,
            redraw_callback: None,
            config,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn viewport(&self) -> ViewRect {
        self.viewport
    }

    /// Resize the viewport. Every actor's cached geometry is invalidated.
    pub fn set_viewport(&mut self, viewport: ViewRect) {
        if self.viewport == viewport {
            return;
        }
        self.viewport = viewport;
        self.invalidate_all();
        self.queue_redraw();
    }

    pub fn set_animations_enabled(&mut self, enabled: bool) {
        self.animations_enabled = enabled;
    }

    /// The scene-wide zoom in pixels per sample, when the scene drives
    /// zoom globally.
    pub fn scene_zoom(&self) -> Option<f64> {
        self.scaled_zoom.as_ref().map(|z| z.pixels_per_sample)
    }

    pub fn scroll_start(&self) -> f64 {
        self.scaled_zoom.as_ref().map(|z| z.scroll_start).unwrap_or(0.0)
    }

    /// Drive zoom from the scene. Actors then share one pixels-per-sample
    /// value instead of deriving zoom from their rect and region.
    pub fn set_zoom(&mut self, pixels_per_sample: f64) {
        let now = Instant::now();
        let animate = self.animations_enabled;
        let duration = Duration::from_millis(self.config.animation_duration_ms);
        let zoom = self.scaled_zoom.get_or_insert(ScaledZoom {
            pixels_per_sample,
            scroll_start: 0.0,
            zoom_anim: None,
            scroll_anim: None,
        });
        if animate {
            zoom.zoom_anim = Some(ScalarAnim {
                from: zoom.pixels_per_sample,
                to: pixels_per_sample,
                started: now,
                duration,
            });
        } else {
            zoom.pixels_per_sample = pixels_per_sample;
        }
        self.invalidate_all();
        self.queue_redraw();
    }

    /// Scroll the scene to put `frame` at the viewport's left edge.
    pub fn set_scroll(&mut self, frame: f64) {
        let now = Instant::now();
        let animate = self.animations_enabled;
        let duration = Duration::from_millis(self.config.animation_duration_ms);
        let Some(zoom) = self.scaled_zoom.as_mut() else {
            return;
        };
        if animate {
            zoom.scroll_anim = Some(ScalarAnim {
                from: zoom.scroll_start,
                to: frame,
                started: now,
                duration,
            });
        } else {
            zoom.scroll_start = frame;
        }
        self.invalidate_all();
        self.queue_redraw();
    }

    /// Scene x of a frame under the scene scroll/zoom.
    pub fn frame_to_x(&self, frame: i64) -> f64 {
        match &self.scaled_zoom {
            Some(zoom) => (frame as f64 - zoom.scroll_start) * zoom.pixels_per_sample,
            None => frame as f64,
        }
    }

    pub fn x_to_frame(&self, x: f64) -> i64 {
        match &self.scaled_zoom {
            Some(zoom) if zoom.pixels_per_sample > 0.0 => {
                (x / zoom.pixels_per_sample + zoom.scroll_start).round() as i64
            }
            _ => x.round() as i64,
        }
    }

    fn clock(&self) -> FrameClock {
        FrameClock {
            now: Instant::now(),
            default_duration: Duration::from_millis(self.config.animation_duration_ms),
            animations_enabled: self.animations_enabled,
        }
    }

    pub fn add_actor(&mut self) -> ActorId {
        let actor = WaveformActor::new();
        for (idx, slot) in self.actors.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(actor);
                return ActorId(idx);
            }
        }
        self.actors.push(Some(actor));
        ActorId(self.actors.len() - 1)
    }

    pub fn remove_actor(&mut self, id: ActorId) {
        let Some(slot) = self.actors.get_mut(id.0) else {
            return;
        };
        if let Some(mut actor) = slot.take() {
            if let Some(waveform) = actor.set_waveform(None) {
                self.release_waveform_if_unused(&waveform);
            }
        }
    }

    pub fn actor(&self, id: ActorId) -> Option<&WaveformActor> {
        self.actors.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut WaveformActor> {
        self.actors.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Point an actor at a waveform (or at nothing) and start loading its
    /// peaks. `on_load` fires exactly once through the waveform's promise.
    pub fn set_waveform(
        &mut self,
        id: ActorId,
        waveform: Option<Arc<Waveform>>,
        on_load: impl FnOnce(&Result<(), WaveformError>) + Send + 'static,
    ) {
        let Some(actor) = self.actors.get_mut(id.0).and_then(|slot| slot.as_mut()) else {
            return;
        };
        let old = actor.set_waveform(waveform.clone());
        if let Some(old) = old {
            if waveform.as_ref().map(|w| w.id()) != Some(old.id()) {
                self.release_waveform_if_unused(&old);
            }
        }
        match waveform {
            Some(waveform) => waveform.load(on_load),
            None => on_load(&Ok(())),
        }
        self.queue_redraw();
    }

    /// Drop render data for a waveform no other actor still shows.
    fn release_waveform_if_unused(&mut self, waveform: &Arc<Waveform>) {
        let still_used = self.actors.iter().flatten().any(|actor| {
            actor.waveform().map(|w| w.id()) == Some(waveform.id())
        });
        if !still_used {
            debug!("{}: releasing render data", waveform.id());
            self.modes.free_waveform(waveform.id());
            self.textures.remove_waveform(waveform.id());
        }
    }

    pub fn set_region(&mut self, id: ActorId, region: SampleRegion) {
        let clock = self.clock();
        if let Some(actor) = self.actor_mut(id) {
            actor.set_region(region, &clock);
        }
        self.queue_redraw();
    }

    pub fn set_rect(&mut self, id: ActorId, rect: FloatRect) {
        let clock = self.clock();
        if let Some(actor) = self.actor_mut(id) {
            actor.set_rect(rect, &clock);
        }
        self.queue_redraw();
    }

    pub fn set_full(
        &mut self,
        id: ActorId,
        region: Option<SampleRegion>,
        rect: Option<FloatRect>,
        duration: Duration,
        on_finish: Option<Box<dyn FnOnce() + Send>>,
    ) {
        let clock = self.clock();
        if let Some(actor) = self.actor_mut(id) {
            actor.set_full(region, rect, duration, &clock, on_finish);
        }
        self.queue_redraw();
    }

    pub fn set_z(&mut self, id: ActorId, z: f32) {
        let clock = self.clock();
        if let Some(actor) = self.actor_mut(id) {
            actor.set_z(z, &clock);
        }
        self.queue_redraw();
    }

    pub fn set_colour(&mut self, id: ActorId, colour: Rgba) {
        if let Some(actor) = self.actor_mut(id) {
            actor.set_colour(colour);
        }
        self.queue_redraw();
    }

    pub fn fade_in(&mut self, id: ActorId) {
        let clock = self.clock();
        if let Some(actor) = self.actor_mut(id) {
            actor.fade_in(&clock);
        }
        self.queue_redraw();
    }

    pub fn fade_out(&mut self, id: ActorId) {
        let clock = self.clock();
        if let Some(actor) = self.actor_mut(id) {
            actor.fade_out(&clock);
        }
        self.queue_redraw();
    }

    pub fn scroll_to(&mut self, id: ActorId, start: i64) {
        let clock = self.clock();
        if let Some(actor) = self.actor_mut(id) {
            actor.scroll_to(start, &clock);
        }
        self.queue_redraw();
    }

    /// Advance the frame clock: drain worker completions onto this thread
    /// and step every running animation. Returns true while anything is
    /// still moving.
    pub fn tick(&mut self, now: Instant) -> bool {
        worker::peak_worker().drain_completed();
        worker::audio_worker().drain_completed();

        let mut active = false;
        let mut zoom_changed = false;
        if let Some(zoom) = self.scaled_zoom.as_mut() {
            if let Some(anim) = &zoom.zoom_anim {
                let (value, finished) = anim.value_at(now);
                zoom.pixels_per_sample = value;
                if finished {
                    zoom.zoom_anim = None;
                } else {
                    active = true;
                }
                zoom_changed = true;
            }
            if let Some(anim) = &zoom.scroll_anim {
                let (value, finished) = anim.value_at(now);
                zoom.scroll_start = value;
                if finished {
                    zoom.scroll_anim = None;
                } else {
                    active = true;
                }
                zoom_changed = true;
            }
        }
        if zoom_changed {
            self.invalidate_all();
        }

        for actor in self.actors.iter_mut().flatten() {
            if actor.tick(now) {
                active = true;
            }
            if actor.has_transitions() {
                active = true;
            }
        }
        if active {
            self.queue_redraw();
        }
        active
    }

    /// Paint one actor. Missing blocks are requested first, so a false
    /// return (data not ready) comes with the loads already in flight.
    pub fn paint_actor(&mut self, id: ActorId, gpu: &mut dyn Gpu) -> bool {
        let Some(slot) = self.actors.get_mut(id.0) else {
            return false;
        };
        let Some(actor) = slot.as_mut() else {
            return false;
        };
        let scene_zoom = self.scaled_zoom.as_ref().map(|z| z.pixels_per_sample);
        let mut ctx = RenderCtx::new(gpu, &mut self.textures);
        actor.load_missing_blocks(&mut ctx, &mut self.modes, &self.viewport, scene_zoom);
        let complete = actor.paint(&mut ctx, &mut self.modes, &self.viewport, scene_zoom);
        let stolen = std::mem::take(&mut ctx.stolen);
        drop(ctx);
        self.modes.dispatch_stolen(&stolen);
        self.textures.sweep(gpu);
        complete
    }

    /// Paint every actor in ascending z order. Returns true when all of
    /// them rendered complete at their target resolution.
    pub fn paint_all(&mut self, gpu: &mut dyn Gpu) -> bool {
        let mut order: Vec<(usize, f32)> = self
            .actors
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|actor| (idx, actor.z())))
            .collect();
        order.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut complete = true;
        for (idx, _) in order {
            if !self.paint_actor(ActorId(idx), gpu) {
                complete = false;
            }
        }
        complete
    }

    pub fn set_redraw_callback(&mut self, callback: impl FnMut() + 'static) {
        self.redraw_callback = Some(Box::new(callback));
    }

    pub fn queue_redraw(&mut self) {
        if !self.redraw_queued {
            self.redraw_queued = true;
            if let Some(callback) = self.redraw_callback.as_mut() {
                callback();
            }
        }
    }

    /// True once since the last call when a redraw was requested.
    pub fn take_redraw_queued(&mut self) -> bool {
        std::mem::take(&mut self.redraw_queued)
    }

    fn invalidate_all(&mut self) {
        for actor in self.actors.iter_mut().flatten() {
            actor.invalidate();
        }
    }
}
