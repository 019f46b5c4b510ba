//! Push-to-pull event bridging.
//!
//! An [`Emitter`] is a multicast push source. Each [`EventBridge`] attached
//! to it is an independent pull sequence backed by an unbounded queue, so a
//! slow consumer never loses events and never blocks the emitter.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
};

use futures::{
    Stream,
    stream::{self, BoxStream, StreamExt},
};
use tokio::sync::mpsc;

struct Listeners<T> {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<T>>,
}

fn lock<T>(listeners: &Mutex<Listeners<T>>) -> MutexGuard<'_, Listeners<T>> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

fn detach<T>(listeners: &Weak<Mutex<Listeners<T>>>, id: u64) {
    if let Some(listeners) = listeners.upgrade() {
        lock(&listeners).senders.remove(&id);
    }
}

/// Multicast push source.
pub struct Emitter<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Emitter<T> {
    /// Create an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                senders: HashMap::new(),
            })),
        }
    }

    /// Push an event to every attached bridge.
    ///
    /// Returns how many bridges received it; zero means the event was dropped.
    pub fn emit(&self, event: T) -> usize {
        let mut listeners = lock(&self.listeners);
        listeners.senders.retain(|_, tx| !tx.is_closed());
        listeners
            .senders
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Attach a new listener and return its pull sequence.
    #[must_use]
    pub fn bridge(&self) -> EventBridge<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.senders.insert(id, tx);

        EventBridge {
            id,
            rx,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of attached bridges.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let mut listeners = lock(&self.listeners);
        listeners.senders.retain(|_, tx| !tx.is_closed());
        listeners.senders.len()
    }

    /// Detach every bridge; each ends after draining what it already queued.
    pub fn close_all(&self) {
        lock(&self.listeners).senders.clear();
    }
}

/// Pull sequence fed by an [`Emitter`].
///
/// Dropping the bridge detaches its listener.
pub struct EventBridge<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    listeners: Weak<Mutex<Listeners<T>>>,
}

impl<T> EventBridge<T> {
    /// Wait for the next event; `None` once the bridge is closed and drained.
    pub async fn next_event(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Detach from the emitter and stop accepting events.
    pub fn close(&mut self) {
        detach(&self.listeners, self.id);
        self.rx.close();
    }

    /// Handle that closes this bridge from elsewhere, ending a pending wait.
    #[must_use]
    pub fn closer(&self) -> BridgeCloser<T> {
        BridgeCloser {
            id: self.id,
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Stream for EventBridge<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for EventBridge<T> {
    fn drop(&mut self) {
        detach(&self.listeners, self.id);
    }
}

/// Closes an [`EventBridge`] without borrowing it.
pub struct BridgeCloser<T> {
    id: u64,
    listeners: Weak<Mutex<Listeners<T>>>,
}

impl<T> BridgeCloser<T> {
    /// Detach the listener. The bridge yields what it already queued, then ends.
    pub fn close(&self) {
        detach(&self.listeners, self.id);
    }
}

/// Fan several pull sequences into one.
///
/// Only the source that produced a value is polled again for its next one;
/// the merged sequence ends when every source has ended.
#[must_use]
pub fn merge<T: Send + 'static>(sources: Vec<BoxStream<'static, T>>) -> BoxStream<'static, T> {
    stream::select_all(sources).boxed()
}
