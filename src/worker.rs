//! Background job execution.
//!
//! A [`Worker`] owns one background thread consuming a FIFO of jobs. Each
//! job holds only a weak reference to its waveform, so dropping the last
//! strong reference is an implicit cancellation: `work` still runs to
//! completion, but `done` never sees a dead waveform unless it asks for
//! `None`. Completions are queued back and delivered by
//! [`Worker::drain_completed`], which the scene pumps each frame; that call
//! site is the "main thread" for everything downstream.

use std::{
    sync::{
        Arc, LazyLock, Mutex, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::waveform::{Waveform, WaveformId};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Worker used for peakfile generation.
pub fn peak_worker() -> &'static Worker {
    static WORKER: LazyLock<Worker> = LazyLock::new(|| Worker::new("peakgen"));
    &WORKER
}

/// Worker used for audio block loading.
pub fn audio_worker() -> &'static Worker {
    static WORKER: LazyLock<Worker> = LazyLock::new(|| Worker::new("audio"));
    &WORKER
}

/// Cancel every queued or running job for a waveform, on both workers.
pub fn cancel_jobs(id: WaveformId) {
    peak_worker().cancel(id);
    audio_worker().cancel(id);
}

struct Job {
    serial: u64,
    waveform: Weak<Waveform>,
    cancelled: Arc<AtomicBool>,
    work: Box<dyn FnOnce(&Waveform) + Send>,
    done: Box<dyn FnOnce(Option<Arc<Waveform>>) + Send>,
}

struct Completion {
    serial: u64,
    waveform: Weak<Waveform>,
    cancelled: Arc<AtomicBool>,
    done: Box<dyn FnOnce(Option<Arc<Waveform>>) + Send>,
}

/// Entry in the in-flight list; scanned for duplicate suppression and
/// cancellation.
struct JobTag {
    serial: u64,
    waveform: WaveformId,
    block: Option<usize>,
    cancelled: Arc<AtomicBool>,
}

pub struct Worker {
    name: &'static str,
    queue: mpsc::Sender<Job>,
    completed: Mutex<mpsc::Receiver<Completion>>,
    jobs: Arc<Mutex<Vec<JobTag>>>,
}

impl Worker {
    pub fn new(name: &'static str) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel::<Job>();
        let (done_tx, done_rx) = mpsc::channel::<Completion>();

        let thread_name = format!("wavetile-{name}");
        let spawned = thread::Builder::new().name(thread_name).spawn(move || {
            while let Ok(job) = queue_rx.recv() {
                if let Some(waveform) = job.waveform.upgrade() {
                    if !job.cancelled.load(Ordering::SeqCst) {
                        (job.work)(&waveform);
                    }
                }
                let completion = Completion {
                    serial: job.serial,
                    waveform: job.waveform,
                    cancelled: job.cancelled,
                    done: job.done,
                };
                if done_tx.send(completion).is_err() {
                    break;
                }
            }
        });
        if let Err(err) = spawned {
            warn!("failed to spawn {name} worker thread: {err}");
        }

        Self {
            name,
            queue: queue_tx,
            completed: Mutex::new(done_rx),
            jobs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a job. `work` runs on the worker thread with a live waveform;
    /// `done` runs at the next [`drain_completed`] unless the job was
    /// cancelled.
    pub fn push_job(
        &self,
        waveform: &Arc<Waveform>,
        block: Option<usize>,
        work: impl FnOnce(&Waveform) + Send + 'static,
        done: impl FnOnce(Option<Arc<Waveform>>) + Send + 'static,
    ) {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut jobs = self.jobs.lock().expect("worker job list");
            jobs.push(JobTag {
                serial,
                waveform: waveform.id(),
                block,
                cancelled: Arc::clone(&cancelled),
            });
        }
        let job = Job {
            serial,
            waveform: Arc::downgrade(waveform),
            cancelled,
            work: Box::new(work),
            done: Box::new(done),
        };
        if self.queue.send(job).is_err() {
            warn!("{} worker queue closed; job dropped", self.name);
        }
    }

    /// True when a live job for (waveform, block) is already queued.
    pub fn is_queued(&self, waveform: WaveformId, block: Option<usize>) -> bool {
        self.jobs
            .lock()
            .expect("worker job list")
            .iter()
            .any(|tag| {
                tag.waveform == waveform
                    && tag.block == block
                    && !tag.cancelled.load(Ordering::SeqCst)
            })
    }

    /// Flag every job for the waveform; their `done` callbacks are skipped.
    pub fn cancel(&self, waveform: WaveformId) {
        let jobs = self.jobs.lock().expect("worker job list");
        let mut n = 0;
        for tag in jobs.iter().filter(|tag| tag.waveform == waveform) {
            tag.cancelled.store(true, Ordering::SeqCst);
            n += 1;
        }
        if n > 0 {
            debug!("{}: cancelled {n} jobs", self.name);
        }
    }

    /// Deliver finished jobs on the calling thread. Returns the number of
    /// completions processed (cancelled ones included).
    pub fn drain_completed(&self) -> usize {
        let mut completions = Vec::new();
        {
            let receiver = self.completed.lock().expect("worker completion queue");
            while let Ok(completion) = receiver.try_recv() {
                completions.push(completion);
            }
        }
        let n = completions.len();
        for completion in completions {
            {
                let mut jobs = self.jobs.lock().expect("worker job list");
                jobs.retain(|tag| tag.serial != completion.serial);
            }
            if completion.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            (completion.done)(completion.waveform.upgrade());
        }
        n
    }

    /// Drain until the in-flight list is empty or the timeout expires.
    /// Intended for tests and sync entry points.
    pub fn drain_blocking(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_completed();
            if self.jobs.lock().expect("worker job list").is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.lock().expect("worker job list").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_waveform(name: &str) -> Arc<Waveform> {
        Waveform::new(std::path::Path::new(name))
    }

    #[test]
    fn work_runs_on_worker_and_done_on_drain() {
        let worker = Worker::new("test-basic");
        let waveform = test_waveform("a.wav");
        let work_ran = Arc::new(AtomicBool::new(false));
        let done_ran = Arc::new(AtomicBool::new(false));

        let w = Arc::clone(&work_ran);
        let d = Arc::clone(&done_ran);
        worker.push_job(
            &waveform,
            Some(0),
            move |_| {
                w.store(true, Ordering::SeqCst);
            },
            move |alive| {
                assert!(alive.is_some());
                d.store(true, Ordering::SeqCst);
            },
        );

        assert!(worker.drain_blocking(Duration::from_secs(5)));
        assert!(work_ran.load(Ordering::SeqCst));
        assert!(done_ran.load(Ordering::SeqCst));
        assert_eq!(worker.pending_jobs(), 0);
    }

    #[test]
    fn cancelled_jobs_skip_done() {
        let worker = Worker::new("test-cancel");
        let waveform = test_waveform("b.wav");
        let done_count = Arc::new(AtomicUsize::new(0));

        let d = Arc::clone(&done_count);
        worker.push_job(
            &waveform,
            Some(1),
            |_| {},
            move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            },
        );
        worker.cancel(waveform.id());

        assert!(worker.drain_blocking(Duration::from_secs(5)));
        assert_eq!(done_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_the_waveform_hands_done_a_dead_reference() {
        let worker = Worker::new("test-weak");
        let waveform = test_waveform("c.wav");
        let saw_none = Arc::new(AtomicBool::new(false));

        let s = Arc::clone(&saw_none);
        worker.push_job(
            &waveform,
            None,
            |_| {},
            move |alive| {
                s.store(alive.is_none(), Ordering::SeqCst);
            },
        );
        drop(waveform);

        assert!(worker.drain_blocking(Duration::from_secs(5)));
        // By drain time every strong reference is gone; done must not be
        // able to resurrect the waveform.
        assert!(saw_none.load(Ordering::SeqCst));
    }

    #[test]
    fn duplicate_scan_sees_live_jobs_only() {
        let worker = Worker::new("test-queued");
        let waveform = test_waveform("d.wav");

        worker.push_job(&waveform, Some(3), |_| {}, |_| {});
        assert!(worker.is_queued(waveform.id(), Some(3)));
        assert!(!worker.is_queued(waveform.id(), Some(4)));

        worker.cancel(waveform.id());
        assert!(!worker.is_queued(waveform.id(), Some(3)));

        worker.drain_blocking(Duration::from_secs(5));
    }
}
