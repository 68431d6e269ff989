//! wavetile: interactive rendering of very large audio waveforms.
//!
//! The pipeline: a decoder façade feeds a peakfile generator whose output
//! lives in an XDG cache; loaded peaks, decoded audio blocks, and derived
//! hi-res peak buffers feed five level-of-detail renderers through a
//! bounded GPU texture pool; a scene of animatable actors drives the whole
//! thing at frame rate, falling back to coarser data whenever the wanted
//! resolution is still loading.

pub mod actor;
pub mod cache_dir;
pub mod config;
pub mod decoder;
mod error;
pub mod events;
pub mod logging;
pub mod peak;
pub mod promise;
pub mod render;
pub mod scene;
pub mod transition;
pub mod waveform;
pub mod worker;

pub use actor::{FloatRect, SampleRegion, ViewRect, WaveformActor};
pub use config::Config;
pub use error::WaveformError;
pub use events::{Subscription, WaveformEvent};
pub use render::Mode;
pub use render::alpha::{AlphaBuf, Pixbuf, waveform_to_pixbuf};
pub use render::gpu::{Gpu, RecordingGpu, Rgba, TextureId};
pub use scene::{ActorId, Scene};
pub use waveform::{Waveform, WaveformId};
