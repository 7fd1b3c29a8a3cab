//! Typed publish/subscribe event bus (spec §4.1).
//!
//! Every task, dataflow, graph, job-queue client, and job-queue server owns
//! one `EventBus<E>` keyed by its own closed event enum. Listeners registered
//! for a given event name fire in registration order, synchronously within a
//! single `emit` call; cross-emitter ordering is never guaranteed (§4.5).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// An event payload type. `name()` must return one value per logical event
/// kind, i.e. a closed set — this is what listeners key on.
pub trait EventKind: Clone + Send + Sync + 'static {
    fn name(&self) -> &'static str;
}

pub type ListenerId = u64;

type ListenerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

enum Slot<E> {
    Many(ListenerFn<E>),
    Once(ListenerFn<E>),
}

struct Inner<E: EventKind> {
    listeners: Mutex<HashMap<&'static str, Vec<(ListenerId, Slot<E>)>>>,
    next_id: AtomicU64,
}

/// A typed event emitter. Cheap to clone — clones share the same listener
/// table, matching "each emitter owns its listeners" (no global table).
pub struct EventBus<E: EventKind> {
    inner: Arc<Inner<E>>,
}

impl<E: EventKind> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<E: EventKind> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EventKind> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn alloc_id(&self) -> ListenerId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a persistent listener for `event`. Returns an id usable with
    /// [`off`](Self::off).
    pub fn on(&self, event: &'static str, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = self.alloc_id();
        self.inner
            .listeners
            .lock()
            .entry(event)
            .or_default()
            .push((id, Slot::Many(Arc::new(listener))));
        id
    }

    /// Register a listener that is removed before it is invoked the next
    /// time `event` fires.
    pub fn once(&self, event: &'static str, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = self.alloc_id();
        self.inner
            .listeners
            .lock()
            .entry(event)
            .or_default()
            .push((id, Slot::Once(Arc::new(listener))));
        id
    }

    /// Deregister a listener previously returned by [`on`](Self::on) or
    /// [`once`](Self::once).
    pub fn off(&self, event: &'static str, id: ListenerId) {
        if let Some(v) = self.inner.listeners.lock().get_mut(event) {
            v.retain(|(lid, _)| *lid != id);
        }
    }

    /// Emit `event`. Once-listeners are removed from the table before being
    /// invoked. The listener list for `event` is snapshotted before
    /// invocation so a listener may freely call `on`/`off`/`emit` on this bus
    /// without deadlocking or corrupting iteration.
    pub fn emit(&self, event: E) {
        let name = event.name();
        let to_call: Vec<ListenerFn<E>> = {
            let mut listeners = self.inner.listeners.lock();
            let Some(slots) = listeners.get_mut(name) else {
                return;
            };
            // Remove `Once` slots up front ("removed before invocation").
            let mut keep = Vec::with_capacity(slots.len());
            let mut call = Vec::with_capacity(slots.len());
            for (id, slot) in slots.drain(..) {
                match slot {
                    Slot::Many(f) => {
                        call.push(f.clone());
                        keep.push((id, Slot::Many(f)));
                    }
                    Slot::Once(f) => {
                        call.push(f);
                    }
                }
            }
            *slots = keep;
            call
        };
        for f in to_call {
            f(&event);
        }
    }

    /// Return a future that resolves with the next emission of `event`.
    /// Dropping the future before it resolves deregisters the internal
    /// listener.
    pub fn wait_on(&self, event: &'static str) -> WaitOn<E> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let id = self.on(event, move |ev: &E| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(ev.clone());
            }
        });
        WaitOn {
            rx,
            bus: Arc::downgrade(&self.inner),
            event,
            id,
            done: false,
        }
    }
}

/// Future returned by [`EventBus::wait_on`].
pub struct WaitOn<E: EventKind> {
    rx: oneshot::Receiver<E>,
    bus: Weak<Inner<E>>,
    event: &'static str,
    id: ListenerId,
    done: bool,
}

impl<E: EventKind> Future for WaitOn<E> {
    type Output = Option<E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(ev)) => {
                this.done = true;
                Poll::Ready(Some(ev))
            }
            Poll::Ready(Err(_)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E: EventKind> Drop for WaitOn<E> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(inner) = self.bus.upgrade() {
            if let Some(v) = inner.listeners.lock().get_mut(self.event) {
                v.retain(|(lid, _)| *lid != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[derive(Clone)]
    enum Ev {
        Ping(i32),
    }
    impl EventKind for Ev {
        fn name(&self) -> &'static str {
            "ping"
        }
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let bus = EventBus::<Ev>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.on("ping", move |_| o1.lock().push(1));
        let o2 = order.clone();
        bus.on("ping", move |_| o2.lock().push(2));
        bus.emit(Ev::Ping(1));
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn once_listener_fires_once() {
        let bus = EventBus::<Ev>::new();
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        bus.once("ping", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Ev::Ping(1));
        bus.emit(Ev::Ping(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_deregisters() {
        let bus = EventBus::<Ev>::new();
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        let id = bus.on("ping", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.off("ping", id);
        bus.emit(Ev::Ping(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wait_on_resolves_on_next_emission() {
        let bus = EventBus::<Ev>::new();
        let bus2 = bus.clone();
        let handle = tokio::spawn(async move { bus2.wait_on("ping").await });
        tokio::task::yield_now().await;
        bus.emit(Ev::Ping(42));
        let result = handle.await.unwrap();
        assert!(matches!(result, Some(Ev::Ping(42))));
    }

    #[tokio::test]
    async fn dropping_wait_on_future_deregisters_listener() {
        let bus = EventBus::<Ev>::new();
        {
            let _fut = bus.wait_on("ping");
            assert_eq!(bus.inner.listeners.lock().get("ping").unwrap().len(), 1);
        }
        assert_eq!(bus.inner.listeners.lock().get("ping").unwrap().len(), 0);
    }
}
