// In-process event fan-out and streaming adapter

mod stream;

pub use stream::{frame, EventStream};

use crate::event::UpdateEvent;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};


/// Heartbeat period for streaming connections
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Subscriber callback. Errors and panics are logged and contained.
pub type EventHandler = Arc<dyn Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync>;

struct DispatcherInner {
    /// Handlers in subscription order
    handlers: RwLock<Vec<(u64, EventHandler)>>,
    next_id: AtomicU64,
}

impl DispatcherInner {
    fn remove(&self, id: u64) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.retain(|(handler_id, _)| *handler_id != id);
    }
}

/// Publish/subscribe bus for [`UpdateEvent`]s.
///
/// Delivery is synchronous, in subscription order, best-effort. A slow
/// handler delays the publisher; there is no back-pressure.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
    heartbeat: Duration,
}

impl EventDispatcher {
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            heartbeat,
        }
    }

    /// Register a handler. It stays subscribed until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(handler)));

        debug!(subscriber = id, "Handler subscribed");

        Subscription {
            id,
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every handler. Returns how many handlers accepted it.
    pub fn publish(&self, event: &UpdateEvent) -> usize {
        // Snapshot so handlers may subscribe/unsubscribe while being called
        let handlers: Vec<(u64, EventHandler)> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => error!(
                    subscriber = id,
                    entity_id = %event.entity_id,
                    event_type = %event.kind,
                    error = %e,
                    "Event handler failed"
                ),
                Err(_) => error!(
                    subscriber = id,
                    entity_id = %event.entity_id,
                    event_type = %event.kind,
                    "Event handler panicked"
                ),
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Open an SSE-style byte stream.
    ///
    /// `filter` restricts forwarded events to those entity ids; `None` forwards
    /// everything. Dropping the stream releases its subscription and heartbeat
    /// timer. Must be called inside a Tokio runtime.
    pub fn stream_for(&self, filter: Option<HashSet<String>>) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();

        let forward_filter = filter.clone();
        let subscription = self.subscribe(move |event| {
            let wanted = forward_filter
                .as_ref()
                .map_or(true, |ids| ids.contains(&event.entity_id));
            if wanted {
                // Receiver only goes away together with the subscription
                let _ = tx.send(event.clone());
            }
            Ok(())
        });

        EventStream::new(rx, subscription, self.heartbeat, filter)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT)
    }
}

/// Handle for a registered handler; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    dispatcher: Weak<DispatcherInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.remove(self.id);
            debug!(subscriber = self.id, "Handler unsubscribed");
        }
    }
}
