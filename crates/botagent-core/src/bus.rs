use parking_lot::Mutex;
use std::sync::Arc;

/// Fan-out publish/subscribe registry.
///
/// Every subscriber gets its own unbounded channel, so publishing never blocks.
/// Subscribers whose receiver was dropped are pruned on the next publish.
/// Delivery order across different subscribers is unspecified.
pub struct EventBus<T> {
    subscribers: Arc<Mutex<Vec<async_channel::Sender<T>>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> async_channel::Receiver<T> {
        let (tx, rx) = async_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: &T) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
