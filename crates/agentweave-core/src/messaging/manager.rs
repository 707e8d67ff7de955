//! Per-agent dispatch of messages to handlers by message type.

use std::collections::HashMap;
use std::sync::Arc;

use agentweave_protocols::{
    HandlerRegistrar, Message, MessageError, MessageHandler, MessageType,
};

use super::router::MessageRouter;

/// Collects an agent's typed handlers, one router per message type.
#[derive(Default)]
pub struct MessageManager {
    routers: HashMap<MessageType, MessageRouter>,
}

impl MessageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.routers
            .entry(message_type)
            .or_default()
            .register(handler);
    }

    pub fn handles(&self, message_type: &MessageType) -> bool {
        self.routers.get(message_type).is_some_and(|r| !r.is_empty())
    }

    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.routers.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    /// Route `message` to the handlers registered for its type.
    pub async fn dispatch(&self, message: &Message) -> Result<(), MessageError> {
        match self.routers.get(&message.message_type) {
            Some(router) if !router.is_empty() => router.route(message).await,
            _ => Err(MessageError::NoHandler(message.message_type.clone())),
        }
    }
}

impl HandlerRegistrar for MessageManager {
    fn register_handler(&mut self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        self.register(message_type, handler);
    }
}
