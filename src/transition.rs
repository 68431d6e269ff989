//! Frame-clock-driven linear transitions over named actor properties.
//!
//! A transition owns `{property, start, target}` members and a wall-clock
//! window. Values are produced by a pure interpolant, so the same machinery
//! both animates (each tick writes the transient value back into the actor)
//! and previews (enumerating the values a transition *will* produce without
//! running it, which is how block preloading stays ahead of pans and
//! zooms). Starting a transition whose targets overlap an in-flight one
//! displaces the shared properties; the displaced property restarts from
//! its current transient value.

use std::time::{Duration, Instant};

/// Animatable actor properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    RegionStart,
    RegionLen,
    RectLeft,
    RectRight,
    Z,
    Opacity,
}

/// One animated property within a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Member {
    pub property: Property,
    pub start: f64,
    pub target: f64,
}

pub struct Transition {
    members: Vec<Member>,
    started: Instant,
    duration: Duration,
    on_finish: Option<Box<dyn FnOnce() + Send>>,
}

impl Transition {
    pub fn new(members: Vec<Member>, started: Instant, duration: Duration) -> Self {
        Self {
            members,
            started,
            duration,
            on_finish: None,
        }
    }

    pub fn with_on_finish(mut self, on_finish: impl FnOnce() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(on_finish));
        self
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Normalized progress at `now`, clamped to [0, 1].
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }

    /// Pure linear interpolant: the value of `member` at progress `t`.
    pub fn value_at(member: &Member, t: f64) -> f64 {
        member.start + (member.target - member.start) * t.clamp(0.0, 1.0)
    }

    /// Sample every member at progress `t` without mutating anything.
    pub fn sample_at(&self, t: f64) -> impl Iterator<Item = (Property, f64)> + '_ {
        self.members
            .iter()
            .map(move |m| (m.property, Self::value_at(m, t)))
    }

    /// Enumerate the values this transition will produce at `frame_rate`,
    /// without running it. The final frame always lands exactly on the
    /// targets.
    pub fn preview(&self, frame_rate: f64, mut each_frame: impl FnMut(f64, &[(Property, f64)])) {
        let n_frames = (self.duration.as_secs_f64() * frame_rate).ceil().max(1.0) as usize;
        let mut values = Vec::with_capacity(self.members.len());
        for frame in 0..=n_frames {
            let t = frame as f64 / n_frames as f64;
            values.clear();
            values.extend(self.sample_at(t));
            each_frame(t, &values);
        }
    }

    /// The target value of a property, if this transition animates it.
    pub fn target_of(&self, property: Property) -> Option<f64> {
        self.members
            .iter()
            .find(|m| m.property == property)
            .map(|m| m.target)
    }

    /// Remove members for the given properties, returning true when the
    /// transition is left empty and should be dropped.
    pub fn displace(&mut self, properties: &[Property]) -> bool {
        self.members
            .retain(|m| !properties.contains(&m.property));
        self.members.is_empty()
    }

    /// Invoke the finish callback, if any. Called exactly once by the owner
    /// when the transition ends or is fully displaced.
    pub fn finish(&mut self) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish();
        }
    }
}
