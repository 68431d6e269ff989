//! The `Waveform`: unit of identity for one audio source.
//!
//! A waveform owns its low-resolution peaks (one pair per 256 frames,
//! loaded whole), a sparse set of hi-res peak blocks derived from decoded
//! audio on demand, and the promise/event plumbing that multiplexes loads.
//! Derived caches elsewhere (audio blocks, GPU textures) key off the
//! [`WaveformId`] so nothing dangles when the waveform goes away; dropping
//! the last `Arc` cancels all in-flight jobs and purges the audio cache.

pub mod audio;
pub mod hires;

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    decoder::{self, Decoder},
    error::WaveformError,
    events::{EventHub, WaveformEvent},
    peak::{self, MAX_FRAMES, PeakBuf, peakgen},
    promise::Promise,
    worker,
};

pub use hires::PeakBlock;

static NEXT_WAVEFORM_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity used as the key in every derived cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaveformId(u64);

impl std::fmt::Display for WaveformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Mutable waveform state. All mutation happens on the main thread; the
/// worker only reads the immutable fields of [`Waveform`].
#[derive(Default)]
pub struct WaveformState {
    /// Total frames; an estimate for some compressed formats.
    pub n_frames: u64,
    /// Channel count, stored only up to 2.
    pub n_channels: u16,
    pub sample_rate: u32,
    /// Source unreachable. A cached peakfile may still make it usable.
    pub offline: bool,
    /// Cleared when the peakfile is corrupt or shorter than expected; once
    /// false, no block load is attempted.
    pub renderable: bool,
    pub peak: Option<PeakBuf>,
    /// Optional RMS sidecar, one byte per peak.
    pub rms: Option<Vec<u8>>,
    /// Hi-res peak blocks, indexed by block number.
    pub hires: Vec<Option<Arc<PeakBlock>>>,
    info_loaded: bool,
}

pub struct Waveform {
    id: WaveformId,
    path: PathBuf,
    is_split: bool,
    state: Mutex<WaveformState>,
    peaks: Promise<()>,
    events: Arc<EventHub>,
    load_started: AtomicBool,
    self_ref: Weak<Waveform>,
}

impl Waveform {
    pub fn new(path: &Path) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: WaveformId(NEXT_WAVEFORM_ID.fetch_add(1, Ordering::Relaxed)),
            path: path.to_path_buf(),
            is_split: decoder::is_split_stereo(path),
            state: Mutex::new(WaveformState {
                renderable: true,
                ..WaveformState::default()
            }),
            peaks: Promise::new(),
            events: EventHub::new(),
            load_started: AtomicBool::new(false),
            self_ref: weak.clone(),
        })
    }

    pub fn id(&self) -> WaveformId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_split(&self) -> bool {
        self.is_split
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// The "peaks ready" promise; resolved exactly once per waveform.
    pub fn peaks_promise(&self) -> &Promise<()> {
        &self.peaks
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&WaveformState) -> R) -> R {
        f(&self.state.lock().expect("waveform state"))
    }

    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut WaveformState) -> R) -> R {
        f(&mut self.state.lock().expect("waveform state"))
    }

    pub fn n_frames(&self) -> u64 {
        self.with_state(|s| s.n_frames)
    }

    pub fn n_channels(&self) -> u16 {
        self.with_state(|s| s.n_channels.clamp(1, 2))
    }

    pub fn sample_rate(&self) -> u32 {
        self.with_state(|s| s.sample_rate)
    }

    pub fn is_offline(&self) -> bool {
        self.with_state(|s| s.offline)
    }

    pub fn is_renderable(&self) -> bool {
        self.with_state(|s| s.renderable)
    }

    pub fn num_peaks(&self) -> usize {
        self.with_state(|s| s.peak.as_ref().map(|p| p.num_peaks()).unwrap_or(0))
    }

    pub fn peaks_loaded(&self) -> bool {
        self.with_state(|s| s.peak.is_some())
    }

    /// Number of render blocks covering the loaded peaks.
    pub fn n_blocks(&self) -> usize {
        self.num_peaks().div_ceil(peak::VISIBLE_BLOCK_PEAKS)
    }

    /// Number of audio/hi-res blocks covering the file.
    pub fn n_audio_blocks(&self) -> usize {
        (self.n_frames() as usize).div_ceil(peak::USABLE_BLOCK_FRAMES)
    }

    /// Open the decoder once to fill in sample rate / channels / frames.
    /// A missing or unreadable source flips `offline` and is an error.
    pub fn ensure_info(&self) -> Result<(), WaveformError> {
        if self.with_state(|s| s.info_loaded) {
            return Ok(());
        }
        match Decoder::open(&self.path) {
            Ok(decoder) => {
                let info = decoder.info().clone();
                if info.frames > MAX_FRAMES {
                    return Err(WaveformError::decode(
                        &self.path,
                        format!("{} frames exceeds the internal cap", info.frames),
                    ));
                }
                self.with_state_mut(|s| {
                    s.n_frames = info.frames;
                    s.n_channels = info.channels.min(2).max(1);
                    s.sample_rate = info.sample_rate;
                    s.info_loaded = true;
                });
                Ok(())
            }
            Err(err) => {
                self.with_state_mut(|s| s.offline = true);
                Err(err)
            }
        }
    }

    /// Load the low-resolution peaks, generating the peakfile if required.
    ///
    /// Any number of concurrent calls share the single `peaks` promise; the
    /// callback always runs exactly once. Errors mark the waveform
    /// non-renderable and are carried on the promise.
    pub fn load(&self, callback: impl FnOnce(&Result<(), WaveformError>) + Send + 'static) {
        self.peaks.add_callback(callback);
        if self.load_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.ensure_info() {
            // The peakfile may still exist for an offline source.
            debug!("{}: source not readable: {err}", self.id);
        }
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        peakgen::ensure_peakfile_async(&this, move |waveform, result| {
            let Some(waveform) = waveform else { return };
            waveform.finish_load(result);
        });
    }

    /// Blocking variant of [`load`] for tests and warmup.
    pub fn load_sync(&self) -> Result<(), WaveformError> {
        self.load(|_| {});
        worker::peak_worker().drain_blocking(Duration::from_secs(30));
        self.peaks
            .result()
            .unwrap_or(Err(WaveformError::Cancelled))
    }

    fn finish_load(&self, peakfile: Result<PathBuf, WaveformError>) {
        let result = peakfile.and_then(|path| self.read_peakfile(&path));
        match result {
            Ok(()) => {
                self.peaks.resolve(());
                self.events.emit(&WaveformEvent::PeakdataReady);
            }
            Err(err) => {
                warn!("{}: peak load failed: {err}", self.id);
                self.with_state_mut(|s| s.renderable = false);
                self.peaks.fail(err);
            }
        }
    }

    fn read_peakfile(&self, path: &Path) -> Result<(), WaveformError> {
        let expected = match self.n_frames() {
            0 => None,
            frames => Some(peak::expected_peaks(frames)),
        };
        let buf = peak::codec::read(path, expected)?;
        self.with_state_mut(|s| {
            // Frame count may only be known through the peakfile when the
            // source itself is offline.
            if s.n_frames == 0 {
                s.n_frames = (buf.num_peaks() * peak::PEAK_RATIO) as u64;
            }
            if s.n_channels == 0 {
                s.n_channels = buf.n_channels() as u16;
            }
            let n_blocks = buf.num_peaks().div_ceil(peak::VISIBLE_BLOCK_PEAKS);
            if s.hires.len() < n_blocks {
                s.hires.resize(n_blocks, None);
            }
            s.peak = Some(buf);
        });
        Ok(())
    }

    /// The hi-res peak block, if it has been derived.
    pub fn hires_peak(&self, block: usize) -> Option<Arc<PeakBlock>> {
        self.with_state(|s| s.hires.get(block).cloned().flatten())
    }

    pub(crate) fn attach_hires(&self, block: usize, peaks: Arc<PeakBlock>) {
        self.with_state_mut(|s| {
            if s.hires.len() <= block {
                s.hires.resize(block + 1, None);
            }
            s.hires[block] = Some(peaks);
        });
    }

    /// Highest absolute level in the loaded peaks.
    pub fn find_max_audio_level(&self) -> Option<i16> {
        self.with_state(|s| {
            let peak = s.peak.as_ref()?;
            let mut max = 0_i16;
            for chan in &peak.channels {
                for &value in chan {
                    max = max.max(value.saturating_abs());
                }
            }
            Some(max)
        })
    }

    /// Load the optional `.rms` sidecar (one byte per peak).
    pub fn load_rms(&self) -> Result<(), WaveformError> {
        let mut rms_path = self.path.as_os_str().to_owned();
        rms_path.push(".rms");
        let rms_path = PathBuf::from(rms_path);
        let data =
            std::fs::read(&rms_path).map_err(|err| WaveformError::no_such_file(&rms_path, &err))?;
        self.with_state_mut(|s| s.rms = Some(data));
        Ok(())
    }
}

impl Drop for Waveform {
    fn drop(&mut self) {
        worker::cancel_jobs(self.id);
        audio::audio_cache().remove_waveform(self.id);
        debug!("{} dropped; derived caches purged", self.id);
    }
}

impl std::fmt::Debug for Waveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waveform")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
