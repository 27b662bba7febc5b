//! Event bus for local writes.
//!
//! Stores publish one [`Event`] per successful write so that the sharing
//! engine can track changes without polling. Internal doctypes never emit.

use sharing_core::consts::FORBIDDEN_DOCTYPES;
use sharing_core::{Document, Verb};
use tokio::sync::broadcast;

/// A write that happened on this instance.
#[derive(Debug, Clone)]
pub struct Event {
    pub verb: Verb,
    /// The document as written (a tombstone for deletions).
    pub doc: Document,
    /// The document before the write, when there was one.
    pub old: Option<Document>,
}

/// Event bus for broadcasting local writes.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Writes nobody listens to are dropped.
    pub fn emit(&self, event: Event) {
        if FORBIDDEN_DOCTYPES.contains(&event.doc.doctype.as_str()) {
            return;
        }
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
