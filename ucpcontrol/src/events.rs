use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Fan-out bus: every subscriber gets its own unbounded channel. A dead
/// subscriber is pruned at the next broadcast without affecting the others.
#[derive(Clone)]
pub(crate) struct EventBus<T: Clone> {
    subscribers: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T: Clone> EventBus<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded::<T>();
        {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.push(tx);
        }
        rx
    }

    pub(crate) fn broadcast(&self, event: T) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
