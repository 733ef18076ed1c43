//! Change events and prefix-filtered event streams.

use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use crate::error::{ConfigError, Result};

/// Kind of change that occurred to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Key was created or overwritten.
    Put,
    /// Key was deleted.
    Delete,
}

/// A change to a single key in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// The absolute key that changed.
    pub key: String,
    pub kind: EventKind,
    /// New value for puts, empty for deletes.
    pub value: String,
}

impl WatchEvent {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: EventKind::Put,
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: EventKind::Delete,
            value: String::new(),
        }
    }

    /// The new value, `None` for deletes.
    pub fn new_value(&self) -> Option<&str> {
        match self.kind {
            EventKind::Put => Some(&self.value),
            EventKind::Delete => None,
        }
    }
}

type EventStream = Pin<Box<dyn Stream<Item = std::result::Result<WatchEvent, BroadcastStreamRecvError>> + Send>>;

/// Ordered stream of events for keys under a prefix.
///
/// A receiver that falls behind yields [`ConfigError::WatchLagged`] once and
/// then continues with the oldest retained event.
pub struct WatchStream {
    inner: EventStream,
    prefix: String,
}

impl WatchStream {
    pub fn new(receiver: broadcast::Receiver<WatchEvent>, prefix: impl Into<String>) -> Self {
        Self {
            inner: Box::pin(BroadcastStream::new(receiver)),
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}

impl Stream for WatchStream {
    type Item = Result<WatchEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if self.matches(&event.key) {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(n)))) => {
                    return Poll::Ready(Some(Err(ConfigError::WatchLagged(n))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Handle for sending watch events to subscribers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<WatchEvent>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self, prefix: impl Into<String>) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), prefix)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(1024)
    }
}
