//! Messaging errors.

use thiserror::Error;

use crate::message::MessageType;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No handler registered for message type {0}")]
    NoHandler(MessageType),

    #[error("No subscriber for recipient {recipient} on {message_type}")]
    Undeliverable {
        recipient: String,
        message_type: MessageType,
    },

    #[error("{} handler(s) failed: {}", .failures.len(), .failures.join("; "))]
    HandlerFailed { failures: Vec<String> },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Message transform failed: {0}")]
    Transform(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Broker is closed")]
    BrokerClosed,
}
