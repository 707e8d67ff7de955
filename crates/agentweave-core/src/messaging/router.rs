//! Local fan-out of a message to every registered handler.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

use agentweave_protocols::{Message, MessageError, MessageHandler};

/// Handle returned by [`MessageRouter::register`].
pub type HandlerId = u64;

/// In-process router. Handlers run one after another in registration
/// order; a failing handler never prevents its siblings from running.
#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<Vec<(HandlerId, Arc<dyn MessageHandler>)>>,
    next_id: AtomicU64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn MessageHandler>) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, handler));
        id
    }

    /// Returns whether the handler was registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Deliver `message` to every handler.
    ///
    /// Handler failures are collected into
    /// [`MessageError::HandlerFailed`] after all handlers ran.
    pub async fn route(&self, message: &Message) -> Result<(), MessageError> {
        let handlers: Vec<(HandlerId, Arc<dyn MessageHandler>)> = self.handlers.read().clone();
        debug!(
            "Routing {} {} to {} handler(s)",
            message.message_type,
            message.id,
            handlers.len()
        );

        let mut failures = Vec::new();
        for (id, handler) in handlers {
            if let Err(e) = handler.handle(message).await {
                error!("Handler {} failed on {}: {}", id, message.id, e);
                failures.push(format!("handler {}: {}", id, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MessageError::HandlerFailed { failures })
        }
    }
}
