//! Storage change notifications.
//!
//! Every mutation on a backend is broadcast as a [`StorageEvent`] tagged with
//! the [`ContextId`] of the handle that made it. A [`WatchStream`] created for
//! one context skips that context's own events, the way a browser only fires
//! `storage` events in tabs other than the writer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{ready, Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identifies one execution context (a tab, a window, a worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a process-unique context id.
    pub fn next() -> Self {
        ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Type of change that occurred to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Key was written (created or overwritten).
    Set,
    /// Key was removed.
    Removed,
}

/// A change to one backend key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEvent {
    /// The raw backend key that changed.
    pub key: String,
    pub kind: EventKind,
    /// Previous text, if the key existed.
    pub old_value: Option<String>,
    /// New text, `None` after a removal.
    pub new_value: Option<String>,
    /// Context whose write produced the event.
    pub origin: ContextId,
}

impl StorageEvent {
    pub fn set(
        key: impl Into<String>,
        old_value: Option<String>,
        new_value: String,
        origin: ContextId,
    ) -> Self {
        Self {
            key: key.into(),
            kind: EventKind::Set,
            old_value,
            new_value: Some(new_value),
            origin,
        }
    }

    pub fn removed(key: impl Into<String>, old_value: String, origin: ContextId) -> Self {
        Self {
            key: key.into(),
            kind: EventKind::Removed,
            old_value: Some(old_value),
            new_value: None,
            origin,
        }
    }
}

/// A stream of storage events for a specific pattern.
///
/// Also usable as a [`Stream`], so `StreamExt` combinators apply.
pub struct WatchStream {
    inner: BroadcastStream<StorageEvent>,
    pattern: String,
    /// Events from this context are dropped.
    skip_origin: Option<ContextId>,
}

impl WatchStream {
    pub fn new(
        receiver: broadcast::Receiver<StorageEvent>,
        pattern: impl Into<String>,
        skip_origin: Option<ContextId>,
    ) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            pattern: pattern.into(),
            skip_origin,
        }
    }

    /// Get the pattern this stream is watching.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if a key matches this stream's pattern.
    fn matches(&self, key: &str) -> bool {
        if let Some(prefix) = self.pattern.strip_suffix('*') {
            key.starts_with(prefix)
        } else {
            key == self.pattern
        }
    }

    fn accepts(&self, event: &StorageEvent) -> bool {
        self.skip_origin != Some(event.origin) && self.matches(&event.key)
    }

    /// Wait for the next matching event. Returns `None` once the backend is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        self.next().await
    }
}

impl Stream for WatchStream {
    type Item = StorageEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) if self.accepts(&event) => return Poll::Ready(Some(event)),
                Some(Ok(_)) => continue,
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(pattern = %self.pattern, skipped, "watch stream lagged");
                    continue;
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Handle for sending storage events to subscribers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<StorageEvent>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: StorageEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events from contexts other than `own`.
    pub fn subscribe_foreign(&self, pattern: impl Into<String>, own: ContextId) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), pattern, Some(own))
    }

    /// Subscribe to events from every context, including the caller's.
    pub fn subscribe_all(&self, pattern: impl Into<String>) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), pattern, None)
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(1024)
    }
}
