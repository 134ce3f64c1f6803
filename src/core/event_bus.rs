//! Pub/Sub event bus for outbound view synchronization.
//!
//! - Subscribers register per event type and are called immediately on emit
//! - Every emitted event is also queued; the host loop drains it with `poll()`
//! - The queue is bounded: when full, the oldest half is evicted
//!
//! Callback order is FIFO within one event type. No ordering across types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::warn;

/// Events kept for `poll()` before eviction
const MAX_QUEUE_SIZE: usize = 1000;

/// Anything `Send + Sync + 'static` can travel on the bus
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Queued event
pub type BoxedEvent = Box<dyn Event>;

#[derive(Default)]
struct Inner {
    subscribers: RwLock<HashMap<TypeId, Vec<Callback>>>,
    queue: Mutex<Vec<BoxedEvent>>,
}

impl Inner {
    fn dispatch(&self, event: BoxedEvent) {
        let type_id = (*event).as_any().type_id();
        // clone the callback list so subscribers may emit re-entrantly
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&type_id)
            .cloned()
            .unwrap_or_default();
        for cb in &callbacks {
            cb((*event).as_any());
        }

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict = queue.len() / 2;
            warn!("Event queue full ({} events), evicting oldest {}", queue.len(), evict);
            queue.drain(0..evict);
        }
        queue.push(event);
    }
}

/// Typed pub/sub bus with a deferred queue
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("queue_len", &self.queue_len()).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` for every future event of type `E`
    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    /// Drop every subscriber of `E`
    pub fn unsubscribe_all<E: Event>(&self) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<E>());
    }

    /// Invoke subscribers now, then queue for `poll()`
    pub fn emit<E: Event>(&self, event: E) {
        self.inner.dispatch(Box::new(event));
    }

    /// Take all queued events
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Emit-only handle sharing this bus
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Emit-only handle, cheap to clone into components
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

impl EventEmitter {
    pub fn emit<E: Event>(&self, event: E) {
        self.inner.dispatch(Box::new(event));
    }
}

/// Downcast a queued event.
///
/// Derefs to `dyn Event` first: calling `as_any()` on the `Box` itself would
/// hit the blanket impl for `Box<dyn Event>` and never match `E`.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
