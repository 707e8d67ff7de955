//! The message envelope.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::payload::{MessagePayload, MessageType};
use crate::error::MessageError;
use crate::types::{Metadata, generate_id};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const MAX_PRIORITY: u8 = 10;

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// A routed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,

    #[serde(rename = "type")]
    pub message_type: MessageType,

    pub sender: String,

    /// Target agent. `None` means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    pub timestamp: DateTime<Utc>,

    pub payload: MessagePayload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,

    /// Opaque transport signature, never interpreted by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Message {
    /// Create a broadcast message whose type follows from the payload.
    ///
    /// Custom payloads get the type `CUSTOM`; use [`Message::custom`] to
    /// name a domain type.
    pub fn new(sender: impl Into<String>, payload: MessagePayload) -> Self {
        let message_type = payload
            .message_type()
            .unwrap_or_else(|| MessageType::Custom("CUSTOM".to_string()));
        Self::build(message_type, sender.into(), payload)
    }

    pub fn custom(
        message_type: impl Into<String>,
        sender: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self::build(
            MessageType::Custom(message_type.into()),
            sender.into(),
            MessagePayload::Custom(data),
        )
    }

    fn build(message_type: MessageType, sender: String, payload: MessagePayload) -> Self {
        Self {
            id: generate_id(),
            message_type,
            sender,
            recipient: None,
            timestamp: Utc::now(),
            payload,
            correlation_id: None,
            reply_to: None,
            priority: DEFAULT_PRIORITY,
            ttl_ms: None,
            signature: None,
            metadata: Metadata::new(),
        }
    }

    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build a response addressed to `reply_to` (or the sender) and
    /// correlated with this message.
    pub fn reply(&self, sender: impl Into<String>, payload: MessagePayload) -> Message {
        let recipient = self
            .reply_to
            .clone()
            .unwrap_or_else(|| self.sender.clone());
        let correlation = self
            .correlation_id
            .clone()
            .unwrap_or_else(|| self.id.clone());
        Message::new(sender, payload)
            .to(recipient)
            .with_correlation_id(correlation)
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => {
                let ttl = Duration::milliseconds(i64::try_from(ttl).unwrap_or(i64::MAX));
                self.timestamp
                    .checked_add_signed(ttl)
                    .is_some_and(|deadline| deadline < now)
            }
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Structural validation performed before a message is published.
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.id.trim().is_empty() {
            return Err(MessageError::Validation("message id is empty".to_string()));
        }
        if self.sender.trim().is_empty() {
            return Err(MessageError::Validation("sender is empty".to_string()));
        }
        if let Some(recipient) = &self.recipient {
            if recipient.trim().is_empty() {
                return Err(MessageError::Validation("recipient is empty".to_string()));
            }
        }
        if self.priority > MAX_PRIORITY {
            return Err(MessageError::Validation(format!(
                "priority {} exceeds {}",
                self.priority, MAX_PRIORITY
            )));
        }
        match self.payload.message_type() {
            Some(expected) if expected != self.message_type => {
                Err(MessageError::Validation(format!(
                    "payload {} does not match message type {}",
                    expected, self.message_type
                )))
            }
            None if !self.message_type.is_custom() => Err(MessageError::Validation(format!(
                "custom payload on built-in message type {}",
                self.message_type
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
