//! One-shot result objects with registered continuations.
//!
//! A [`Promise`] settles exactly once, either with a value or with a
//! [`WaveformError`]; callbacks registered before settlement fire in
//! registration order, callbacks registered after fire immediately.
//! [`when_all`] composes a parent promise over a set of children.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::error::WaveformError;

type Callback<T> = Box<dyn FnOnce(&Result<T, WaveformError>) + Send>;

pub struct Promise<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    result: Option<Result<T, WaveformError>>,
    callbacks: Vec<Callback<T>>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                result: None,
                callbacks: Vec::new(),
            }),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.lock().expect("promise lock").result.is_some()
    }

    /// The settled result, if any.
    pub fn result(&self) -> Option<Result<T, WaveformError>> {
        self.inner.lock().expect("promise lock").result.clone()
    }

    /// Register a continuation. Fires immediately if already settled.
    pub fn add_callback(&self, callback: impl FnOnce(&Result<T, WaveformError>) + Send + 'static) {
        let result = {
            let mut inner = self.inner.lock().expect("promise lock");
            match inner.result.clone() {
                Some(result) => result,
                None => {
                    inner.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        // Invoked outside the lock so the callback may touch the promise
        // again.
        callback(&result);
    }

    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    pub fn fail(&self, error: WaveformError) {
        self.settle(Err(error));
    }

    /// First settlement wins; later calls are ignored.
    fn settle(&self, result: Result<T, WaveformError>) {
        let callbacks = {
            let mut inner = self.inner.lock().expect("promise lock");
            if inner.result.is_some() {
                return;
            }
            inner.result = Some(result.clone());
            std::mem::take(&mut inner.callbacks)
        };
        for callback in callbacks {
            callback(&result);
        }
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `parent` once every child promise has settled.
///
/// Children that settle with an error still count as settled; callers
/// inspect the children when they need individual outcomes.
pub fn when_all<T: Clone + Send + 'static>(parent: Arc<Promise<()>>, children: &[Arc<Promise<T>>]) {
    if children.is_empty() {
        parent.resolve(());
        return;
    }
    let remaining = Arc::new(AtomicUsize::new(children.len()));
    for child in children {
        let parent = Arc::clone(&parent);
        let remaining = Arc::clone(&remaining);
        child.add_callback(move |_| {
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                parent.resolve(());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn callbacks_fire_exactly_once_per_registration() {
        let promise = Promise::new();
        let count = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            promise.add_callback(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        promise.resolve(7_u32);
        promise.resolve(8);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(promise.result(), Some(Ok(7)));
    }

    #[test]
    fn late_registration_fires_immediately() {
        let promise: Promise<u32> = Promise::new();
        promise.fail(WaveformError::Cancelled);
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);
        promise.add_callback(move |result| {
            assert!(result.is_err());
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_does_not_overwrite_resolution() {
        let promise = Promise::new();
        promise.resolve(1_u32);
        promise.fail(WaveformError::Cancelled);
        assert_eq!(promise.result(), Some(Ok(1)));
    }

    #[test]
    fn when_all_waits_for_every_child() {
        let parent = Arc::new(Promise::new());
        let a = Arc::new(Promise::new());
        let b = Arc::new(Promise::new());
        when_all(Arc::clone(&parent), &[Arc::clone(&a), Arc::clone(&b)]);

        a.resolve(1_u32);
        assert!(!parent.is_resolved());
        b.fail(WaveformError::Cancelled);
        assert!(parent.is_resolved());
    }

    #[test]
    fn when_all_with_no_children_resolves_immediately() {
        let parent = Arc::new(Promise::new());
        when_all(Arc::clone(&parent), &[] as &[Arc<Promise<u32>>]);
        assert!(parent.is_resolved());
    }
}
