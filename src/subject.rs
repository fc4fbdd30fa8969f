//! Last-value-cached multicast channel.
//!
//! Every entity publishes its derived state through a `Subject`: the most
//! recent value is retained and replayed to new subscribers, and fan-out
//! uses an unbounded queue per subscriber so a slow consumer can never
//! block the connection pump.

use parking_lot::Mutex;
use tokio::sync::mpsc;

struct SubjectInner<T> {
    last: Option<T>,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

pub struct Subject<T> {
    inner: Mutex<SubjectInner<T>>,
}

impl<T: Clone> Subject<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SubjectInner {
                last: None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Publishes a value to all live subscribers and retains it for future
    /// ones. Subscribers whose receiver is gone are pruned here.
    pub fn publish(&self, value: T) {
        let mut inner = self.inner.lock();
        inner
            .subscribers
            .retain(|sender| sender.send(value.clone()).is_ok());
        inner.last = Some(value);
    }

    /// Registers a subscriber. The retained value, if any, is delivered
    /// immediately.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if let Some(last) = &inner.last {
            let _ = sender.send(last.clone());
        }
        inner.subscribers.push(sender);
        receiver
    }

    /// The most recently published value.
    pub fn last(&self) -> Option<T> {
        self.inner.lock().last.clone()
    }
}

impl<T: Clone> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject").finish_non_exhaustive()
    }
}
