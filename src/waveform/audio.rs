//! Decoded audio blocks and the process-wide audio cache.
//!
//! Audio blocks overlap so that there is a 1:1 block relationship all the
//! way through the rendering chain: block `b` starts at
//! `b * USABLE_BLOCK_FRAMES` and spans [`PEAK_BLOCK_SIZE`] frames, so each
//! block shares a border's worth of frames with its neighbours. Block
//! starts are not offset; renderers delay drawing by the border width.
//!
//! The cache is bounded by a global budget counted in 16-bit samples.
//! Eviction is strictly least-recently-used by access stamp, across all
//! waveforms.

use std::{
    collections::HashMap,
    sync::{
        Arc, LazyLock, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    decoder::{Decoder, ShortBuf},
    error::WaveformError,
    events::WaveformEvent,
    peak::{PEAK_BLOCK_SIZE, USABLE_BLOCK_FRAMES},
    worker,
};

use super::{Waveform, WaveformId, hires};

/// Decoded 16-bit PCM for one block, one buffer per channel.
///
/// The channel buffers are always [`PEAK_BLOCK_SIZE`] long; `len` is the
/// number of valid frames (the last block of a file comes up short and is
/// zero-padded).
#[derive(Debug, Clone)]
pub struct AudioBuf {
    pub channels: Vec<Arc<[i16]>>,
    pub len: usize,
}

impl AudioBuf {
    /// Cache cost in 16-bit samples.
    fn cost(&self) -> usize {
        self.channels.len() * PEAK_BLOCK_SIZE
    }
}

/// The process-wide audio block cache.
pub fn audio_cache() -> &'static AudioCache {
    static CACHE: LazyLock<AudioCache> = LazyLock::new(AudioCache::new);
    &CACHE
}

pub struct AudioCache {
    budget: AtomicUsize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<(WaveformId, usize), Entry>,
    mem_samples: usize,
    access_counter: u64,
}

struct Entry {
    buf: Arc<AudioBuf>,
    stamp: u64,
}

impl AudioCache {
    fn new() -> Self {
        Self {
            budget: AtomicUsize::new(1 << 23),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn set_budget(&self, samples: usize) {
        self.budget.store(samples.max(1), Ordering::Relaxed);
    }

    /// Fetch a block, bumping its access stamp.
    pub fn get(&self, waveform: WaveformId, block: usize) -> Option<Arc<AudioBuf>> {
        let mut inner = self.inner.lock().expect("audio cache");
        inner.access_counter += 1;
        let counter = inner.access_counter;
        let entry = inner.entries.get_mut(&(waveform, block))?;
        entry.stamp = counter;
        Some(Arc::clone(&entry.buf))
    }

    /// Insert a block, evicting least-recently-used blocks to stay within
    /// budget. Returns false (and logs) when the block cannot fit.
    pub(crate) fn insert(&self, waveform: WaveformId, block: usize, buf: Arc<AudioBuf>) -> bool {
        let budget = self.budget.load(Ordering::Relaxed);
        let cost = buf.cost();
        let mut inner = self.inner.lock().expect("audio cache");

        if let Some(old) = inner.entries.remove(&(waveform, block)) {
            // Reload of a cached block; the derived peaks are rebuilt by the
            // caller, so the stale audio just goes away.
            warn!("{waveform}: overwriting cached audio for block {block}");
            inner.mem_samples -= old.buf.cost();
        }

        while inner.mem_samples + cost > budget {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.stamp)
                .map(|(key, _)| *key);
            let Some(key) = oldest else { break };
            if let Some(entry) = inner.entries.remove(&key) {
                inner.mem_samples -= entry.buf.cost();
                debug!("audio cache full: evicted {}:{}", key.0, key.1);
            }
        }
        if inner.mem_samples + cost > budget {
            warn!("audio cache: cannot free space for {waveform}:{block}");
            return false;
        }

        inner.access_counter += 1;
        let stamp = inner.access_counter;
        inner.mem_samples += cost;
        inner.entries.insert((waveform, block), Entry { buf, stamp });
        true
    }

    /// Drop every block belonging to a waveform.
    pub fn remove_waveform(&self, waveform: WaveformId) {
        let mut inner = self.inner.lock().expect("audio cache");
        let keys: Vec<_> = inner
            .entries
            .keys()
            .filter(|(id, _)| *id == waveform)
            .copied()
            .collect();
        for key in keys {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.mem_samples -= entry.buf.cost();
            }
        }
    }

    /// Current usage in 16-bit samples.
    pub fn mem_used(&self) -> usize {
        self.inner.lock().expect("audio cache").mem_samples
    }

    /// Number of blocks the budget can hold.
    pub fn capacity_blocks(&self) -> usize {
        self.budget.load(Ordering::Relaxed) / PEAK_BLOCK_SIZE
    }
}

/// Decode one block of audio from disk. Runs on the worker thread; the
/// waveform is only read.
fn load_block_from_disk(waveform: &Waveform, block: usize) -> Result<AudioBuf, WaveformError> {
    let start = (block * USABLE_BLOCK_FRAMES) as u64;
    let n_channels = waveform.n_channels() as usize;

    let mut decoder = Decoder::open(waveform.path())?;
    decoder.seek(start)?;

    let mut buf = ShortBuf::new(n_channels, PEAK_BLOCK_SIZE);
    let mut filled = 0;
    while filled < PEAK_BLOCK_SIZE {
        let mut chunk = ShortBuf::new(n_channels, PEAK_BLOCK_SIZE - filled);
        let n = decoder.read_short(&mut chunk)?;
        if n == 0 {
            break;
        }
        for (c, chan) in chunk.channels.iter().enumerate() {
            buf.channels[c][filled..filled + n].copy_from_slice(&chan[..n]);
        }
        filled += n;
    }

    Ok(AudioBuf {
        channels: buf
            .channels
            .into_iter()
            .map(|c| Arc::from(c.into_boxed_slice()))
            .collect(),
        len: filled,
    })
}

type AudioReady = Box<dyn FnOnce(&Arc<Waveform>, usize) + Send>;

/// Load one audio block into the cache and derive its hi-res peaks.
///
/// If the block is cached, `done` fires synchronously and the stamp is
/// bumped. If a job for the block is already queued, this is a no-op: the
/// in-flight job's `HiresReady` signal covers every interested caller.
/// Otherwise a worker job decodes the block and, back on the main thread,
/// inserts the audio, attaches the peak block, calls `done`, and emits
/// `HiresReady(block)`.
pub fn load_audio(
    waveform: &Arc<Waveform>,
    block: usize,
    min_output_tiers: u32,
    done: impl FnOnce(&Arc<Waveform>, usize) + Send + 'static,
) {
    if block >= waveform.n_audio_blocks() {
        warn!(
            "{}: audio block {block} out of range ({})",
            waveform.id(),
            waveform.n_audio_blocks()
        );
        return;
    }
    if audio_cache().get(waveform.id(), block).is_some() {
        done(waveform, block);
        return;
    }
    if worker::audio_worker().is_queued(waveform.id(), Some(block)) {
        return;
    }

    let slot: Arc<Mutex<Option<(Arc<AudioBuf>, hires::PeakBlock)>>> = Arc::new(Mutex::new(None));
    let work_slot = Arc::clone(&slot);
    let done: AudioReady = Box::new(done);

    worker::audio_worker().push_job(
        waveform,
        Some(block),
        move |waveform| match load_block_from_disk(waveform, block) {
            Ok(audio) => {
                let peaks = hires::regen(&audio, block, min_output_tiers);
                *work_slot.lock().expect("audio load slot") = Some((Arc::new(audio), peaks));
            }
            Err(err) => {
                // Recoverable: the block stays unavailable and the renderer
                // falls through.
                warn!("{}: audio load failed for block {block}: {err}", waveform.id());
            }
        },
        move |waveform| {
            let Some(waveform) = waveform else { return };
            let Some((audio, peaks)) = slot.lock().expect("audio load slot").take() else {
                return;
            };
            audio_cache().insert(waveform.id(), block, audio);
            waveform.attach_hires(block, Arc::new(peaks));
            done(&waveform, block);
            waveform.events().emit(&WaveformEvent::HiresReady(block));
        },
    );
}

/// Blocking variant of [`load_audio`] for tests and warmup.
pub fn load_audio_sync(waveform: &Arc<Waveform>, block: usize, min_output_tiers: u32) {
    load_audio(waveform, block, min_output_tiers, |_, _| {});
    worker::audio_worker().drain_blocking(Duration::from_secs(30));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_dir::CacheRootGuard;
    use crate::events::WaveformEvent;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    // Tests that watch the global audio worker's queue state run serially
    // so a concurrent drain cannot steal their completions.
    static WORKER_LOCK: Mutex<()> = Mutex::new(());

    fn block_of(level: i16, channels: usize) -> Arc<AudioBuf> {
        Arc::new(AudioBuf {
            channels: vec![
                Arc::from(vec![level; PEAK_BLOCK_SIZE].into_boxed_slice());
                channels
            ],
            len: PEAK_BLOCK_SIZE,
        })
    }

    #[test]
    fn eviction_is_lru_by_stamp() {
        let cache = AudioCache::new();
        cache.set_budget(2 * PEAK_BLOCK_SIZE);
        let w = super::super::Waveform::new(Path::new("lru.wav")).id();

        assert!(cache.insert(w, 0, block_of(1, 1)));
        assert!(cache.insert(w, 1, block_of(2, 1)));
        // touch block 0 so block 1 is the eviction candidate
        cache.get(w, 0);
        assert!(cache.insert(w, 2, block_of(3, 1)));

        assert!(cache.get(w, 0).is_some());
        assert!(cache.get(w, 1).is_none());
        assert!(cache.get(w, 2).is_some());
        assert!(cache.mem_used() <= 2 * PEAK_BLOCK_SIZE);
    }

    #[test]
    fn oversized_insert_fails_gracefully() {
        let cache = AudioCache::new();
        cache.set_budget(PEAK_BLOCK_SIZE); // one mono block only
        let w = super::super::Waveform::new(Path::new("tight.wav")).id();

        assert!(!cache.insert(w, 0, block_of(1, 2)));
        assert_eq!(cache.mem_used(), 0);
    }

    #[test]
    fn remove_waveform_releases_all_memory() {
        let cache = AudioCache::new();
        let a = super::super::Waveform::new(Path::new("a.wav")).id();
        let b = super::super::Waveform::new(Path::new("b.wav")).id();
        cache.insert(a, 0, block_of(1, 2));
        cache.insert(a, 1, block_of(1, 2));
        cache.insert(b, 0, block_of(1, 1));

        cache.remove_waveform(a);
        assert_eq!(cache.mem_used(), PEAK_BLOCK_SIZE);
        assert!(cache.get(b, 0).is_some());
    }

    #[test]
    fn load_audio_round_trip_emits_hires_ready() {
        let _serial = WORKER_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let _cache = CacheRootGuard::set(dir.path().join("cache"));
        let audio = dir.path().join("tone.wav");
        super::super::tests::write_tone(&audio, 1, 441_000);

        let waveform = super::super::Waveform::new(&audio);
        waveform.load_sync().unwrap();

        let ready = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ready);
        let _sub = waveform.events().subscribe(move |event| {
            if let WaveformEvent::HiresReady(_) = event {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });

        load_audio_sync(&waveform, 0, 0);
        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert!(audio_cache().get(waveform.id(), 0).is_some());
        assert!(waveform.hires_peak(0).is_some());

        let id = waveform.id();
        drop(waveform);
        assert!(audio_cache().get(id, 0).is_none());
    }

    #[test]
    fn cached_block_fires_done_synchronously() {
        let _serial = WORKER_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let _cache = CacheRootGuard::set(dir.path().join("cache"));
        let audio = dir.path().join("tone.wav");
        super::super::tests::write_tone(&audio, 1, 441_000);

        let waveform = super::super::Waveform::new(&audio);
        waveform.load_sync().unwrap();
        load_audio_sync(&waveform, 0, 0);

        let fired = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&fired);
        load_audio(&waveform, 0, 0, move |_, block| {
            assert_eq!(block, 0);
            f.store(true, Ordering::SeqCst);
        });
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn duplicate_requests_enqueue_one_job() {
        let _serial = WORKER_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let _cache = CacheRootGuard::set(dir.path().join("cache"));
        let audio = dir.path().join("tone.wav");
        super::super::tests::write_tone(&audio, 1, 441_000);

        let waveform = super::super::Waveform::new(&audio);
        waveform.load_sync().unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        let s = Arc::clone(&second);
        load_audio(&waveform, 1, 0, move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(worker::audio_worker().is_queued(waveform.id(), Some(1)));
        // second request while the job is in flight is dropped on the floor
        load_audio(&waveform, 1, 0, move |_, _| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        worker::audio_worker().drain_blocking(Duration::from_secs(30));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }
}
