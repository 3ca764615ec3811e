//! Event system for async line handling.
//!
//! Every routed line and every lifecycle change of a session is broadcast to
//! subscribers. The dispatcher waits on the same stream for replies.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::protocol::ResponseTag;
use crate::types::DeviceKind;

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// Session reached `Ready`.
    Connected { kind: DeviceKind },
    /// Session returned to `Disconnected`.
    Disconnected,
    /// The serial link failed.
    TransportLost { reason: String },
    /// A command line was written.
    CommandSent { text: String },
    /// A line was received and applied to the status.
    Line { tag: ResponseTag, text: String },
}

impl Event {
    /// Returns the response tag if this is a received line.
    #[must_use]
    pub const fn tag(&self) -> Option<ResponseTag> {
        match self {
            Self::Line { tag, .. } => Some(*tag),
            _ => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("event subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine.
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }
}
