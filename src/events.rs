//! Typed publish/subscribe
//!
//! Every component reports state changes through an [`EventEmitter`]. An event type
//! is an enum whose variants carry the payload; [`EventMap::kind`] names the variant so
//! listeners can subscribe to one kind at a time.
//!
//! Delivery order is subscription order. Callbacks run synchronously inside `emit`
//! and are invoked without the listener table locked, so a callback may subscribe or
//! unsubscribe freely.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// An event enum usable with [`EventEmitter`].
pub trait EventMap: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by `on`/`once`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E: EventMap> {
    id: ListenerId,
    kind: E::Kind,
    once: bool,
    callback: Callback<E>,
}

struct Listeners<E: EventMap> {
    next_id: u64,
    entries: Vec<Listener<E>>,
}

/// Cheaply cloneable emitter; clones share one listener table.
pub struct EventEmitter<E: EventMap> {
    inner: Arc<Mutex<Listeners<E>>>,
}

impl<E: EventMap> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: EventMap> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EventMap> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners<E>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribe(&self, kind: E::Kind, once: bool, callback: Callback<E>) -> ListenerId {
        let mut listeners = self.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push(Listener {
            id,
            kind,
            once,
            callback,
        });
        id
    }

    /// Subscribe to every event of `kind`.
    pub fn on<F>(&self, kind: E::Kind, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(kind, false, Arc::new(callback))
    }

    /// Subscribe to the next event of `kind` only.
    pub fn once<F>(&self, kind: E::Kind, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(kind, true, Arc::new(callback))
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|l| l.id != id);
        listeners.entries.len() != before
    }

    /// Remove all listeners of `kind`, or every listener when `kind` is `None`.
    pub fn remove_all_listeners(&self, kind: Option<E::Kind>) {
        let mut listeners = self.lock();
        match kind {
            Some(kind) => listeners.entries.retain(|l| l.kind != kind),
            None => listeners.entries.clear(),
        }
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock().entries.iter().filter(|l| l.kind == kind).count()
    }

    /// Deliver `event` to its subscribers. Returns how many callbacks ran.
    pub fn emit(&self, event: E) -> usize {
        let kind = event.kind();
        let callbacks: Vec<Callback<E>> = {
            let mut listeners = self.lock();
            let matched = listeners
                .entries
                .iter()
                .filter(|l| l.kind == kind)
                .map(|l| Arc::clone(&l.callback))
                .collect();
            listeners.entries.retain(|l| !(l.once && l.kind == kind));
            matched
        };

        tracing::trace!(event = ?kind, listeners = callbacks.len(), "Emitting event");
        for callback in &callbacks {
            callback(&event);
        }
        callbacks.len()
    }
}
