//! Typed event fan-out
//!
//! Each component owns an `EventBus` typed by its event enum. Subscribers
//! get an mpsc-backed stream plus an unsubscribe handle; dropping the
//! subscription detaches it.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct Registry<E> {
    next_id: u64,
    senders: Vec<(u64, mpsc::UnboundedSender<E>)>,
}

/// Publish/subscribe registry for a single event type
pub struct EventBus<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                senders: Vec::new(),
            })),
        }
    }

    /// Register a subscriber and return its stream handle
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.senders.push((id, tx));
        Subscription {
            id,
            rx,
            registry: self.registry.clone(),
        }
    }

    /// Deliver an event to every live subscriber, pruning closed ones
    pub fn emit(&self, event: E) {
        let mut registry = self.registry.lock().unwrap();
        registry
            .senders
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().unwrap().senders.len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Live subscription. Dropping it (or calling `unsubscribe`) detaches the
/// receiver from the bus.
pub struct Subscription<E> {
    id: u64,
    rx: mpsc::UnboundedReceiver<E>,
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Subscription<E> {
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<E> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn unsubscribe(self) {}
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap();
        registry.senders.retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(7);

        assert_eq!(a.try_recv(), Some(7));
        assert_eq!(b.try_recv(), Some(7));
    }

    #[test]
    fn test_unsubscribe_detaches() {
        let bus: EventBus<u32> = EventBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        // Emitting with no subscribers is a no-op
        bus.emit(1);
    }

    #[test]
    fn test_events_arrive_in_order() {
        let bus: EventBus<u32> = EventBus::new();
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.emit(i);
        }
        assert_eq!(sub.drain(), vec![0, 1, 2, 3, 4]);
    }
}
