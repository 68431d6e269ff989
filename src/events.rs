//! Typed event channel attached to each waveform.
//!
//! Subscribers register a handler and receive every subsequent emission;
//! dropping the returned [`Subscription`] unregisters it. Multiple views of
//! the same waveform each subscribe independently.

use std::sync::{Arc, Mutex, Weak};

/// Events emitted by a waveform as data becomes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformEvent {
    /// The low-resolution peak data has been loaded or generated. Emitted once.
    PeakdataReady,
    /// A hi-res peak block (and its audio) became available.
    HiresReady(usize),
}

type Handler = Arc<dyn Fn(&WaveformEvent) + Send + Sync>;

pub struct EventHub {
    inner: Mutex<HubInner>,
    self_ref: Weak<EventHub>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(HubInner::default()),
            self_ref: weak.clone(),
        })
    }

    /// Register a handler; it stays registered until the guard is dropped.
    pub fn subscribe(
        &self,
        handler: impl Fn(&WaveformEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut inner = self.inner.lock().expect("event hub lock");
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.push((id, Arc::new(handler)));
            id
        };
        Subscription {
            hub: self.self_ref.clone(),
            id,
        }
    }

    pub fn emit(&self, event: &WaveformEvent) {
        // Handlers are cloned out so one of them may subscribe or
        // unsubscribe without deadlocking.
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock().expect("event hub lock");
            inner.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().expect("event hub lock");
        inner.handlers.retain(|(existing, _)| *existing != id);
    }

    #[cfg(test)]
    fn handler_count(&self) -> usize {
        self.inner.lock().expect("event hub lock").handlers.len()
    }
}

/// Guard for a registered handler; unsubscribes on drop.
pub struct Subscription {
    hub: Weak<EventHub>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_every_subscriber() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        let c2 = Arc::clone(&count);
        let _s1 = hub.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let _s2 = hub.subscribe(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        hub.emit(&WaveformEvent::PeakdataReady);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = hub.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        hub.emit(&WaveformEvent::HiresReady(0));
        drop(sub);
        hub.emit(&WaveformEvent::HiresReady(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(hub.handler_count(), 0);
    }
}
