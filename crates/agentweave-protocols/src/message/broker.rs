//! Traits at the messaging seams: handlers, brokers, transforms and
//! serializers.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::envelope::Message;
use super::payload::MessageType;
use crate::error::MessageError;

/// Receiver side of the message fabric.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), MessageError>;
}

/// Predicate evaluated before a message reaches a subscription's handler.
pub type MessageFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Identifier returned by [`MessageBroker::subscribe`].
pub type SubscriptionId = String;

/// One typed subscription on a broker.
#[derive(Clone)]
pub struct Subscription {
    /// Id of the subscribing agent, matched against `Message::recipient`.
    pub subscriber_id: String,
    pub message_type: MessageType,
    pub handler: Arc<dyn MessageHandler>,
    pub filter: Option<MessageFilter>,
}

impl Subscription {
    pub fn new(
        subscriber_id: impl Into<String>,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            message_type,
            handler,
            filter: None,
        }
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Whether `message` should be delivered to this subscription.
    pub fn accepts(&self, message: &Message) -> bool {
        if message.message_type != self.message_type {
            return false;
        }
        if let Some(recipient) = &message.recipient {
            if recipient != &self.subscriber_id {
                return false;
            }
        }
        self.filter.as_ref().is_none_or(|f| f(message))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber_id", &self.subscriber_id)
            .field("message_type", &self.message_type)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Addressable publish/subscribe fabric.
///
/// A message with a recipient reaches only that recipient's subscriptions;
/// a message without one reaches every subscription of its type. Publish
/// order is preserved per subscription.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageError>;

    async fn subscribe(&self, subscription: Subscription) -> Result<SubscriptionId, MessageError>;

    async fn unsubscribe(&self, id: &str) -> Result<(), MessageError>;

    /// Remove every subscription `subscriber_id` holds for `message_type`.
    /// Returns how many were removed.
    async fn unsubscribe_type(
        &self,
        subscriber_id: &str,
        message_type: &MessageType,
    ) -> Result<usize, MessageError>;

    /// Acknowledge a delivered message (at-least-once transports).
    async fn acknowledge(&self, message_id: &str) -> Result<(), MessageError> {
        let _ = message_id;
        Ok(())
    }

    /// Reject a delivered message, optionally asking for redelivery.
    async fn reject(&self, message_id: &str, requeue: bool) -> Result<(), MessageError> {
        let _ = (message_id, requeue);
        Ok(())
    }

    async fn close(&self) -> Result<(), MessageError> {
        Ok(())
    }
}

/// Pass-through hook applied to every message crossing a broker.
///
/// Used for signing and encryption middleware. Implementations return a new
/// message and must not change its routing fields.
#[async_trait]
pub trait MessageTransform: Send + Sync {
    fn name(&self) -> &str;

    async fn outbound(&self, message: Message) -> Result<Message, MessageError>;

    async fn inbound(&self, message: Message) -> Result<Message, MessageError> {
        Ok(message)
    }
}

/// Lossless wire encoding of messages.
pub trait MessageSerializer: Send + Sync {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, MessageError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Message, MessageError>;

    /// Shape check run on untrusted data before it is decoded.
    fn validate(&self, value: &serde_json::Value) -> Result<(), MessageError>;
}
