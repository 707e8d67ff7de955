//! JSON wire encoding of messages.

use chrono::DateTime;
use serde_json::Value;

use agentweave_protocols::{Message, MessageError, MessageSerializer};

const REQUIRED_STRINGS: [&str; 4] = ["id", "type", "sender", "timestamp"];
const OPTIONAL_STRINGS: [&str; 4] = ["recipient", "correlation_id", "reply_to", "signature"];

/// Encodes messages as UTF-8 JSON.
///
/// Timestamps travel as RFC 3339 strings with full sub-second precision, so
/// `deserialize(serialize(m)) == m`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMessageSerializer;

impl JsonMessageSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl MessageSerializer for JsonMessageSerializer {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(message)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message, MessageError> {
        let value: Value = serde_json::from_slice(bytes)?;
        self.validate(&value)?;
        let message: Message = serde_json::from_value(value)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self, value: &Value) -> Result<(), MessageError> {
        let object = value
            .as_object()
            .ok_or_else(|| MessageError::Validation("message must be a JSON object".to_string()))?;

        for field in REQUIRED_STRINGS {
            match object.get(field) {
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(MessageError::Validation(format!("{} must be a string", field)));
                }
                None => return Err(MessageError::Validation(format!("missing field {}", field))),
            }
        }
        for field in OPTIONAL_STRINGS {
            if !matches!(object.get(field), None | Some(Value::Null) | Some(Value::String(_))) {
                return Err(MessageError::Validation(format!("{} must be a string", field)));
            }
        }

        if let Some(Value::String(ts)) = object.get("timestamp") {
            DateTime::parse_from_rfc3339(ts).map_err(|e| {
                MessageError::Validation(format!("invalid timestamp {:?}: {}", ts, e))
            })?;
        }

        match object.get("priority") {
            None => {}
            Some(Value::Number(n)) if n.as_u64().is_some_and(|p| p <= 10) => {}
            Some(other) => {
                return Err(MessageError::Validation(format!(
                    "priority must be an integer in 0..=10, got {}",
                    other
                )));
            }
        }

        let payload = object
            .get("payload")
            .and_then(Value::as_object)
            .ok_or_else(|| MessageError::Validation("payload must be an object".to_string()))?;
        if !payload.get("kind").is_some_and(Value::is_string) {
            return Err(MessageError::Validation(
                "payload.kind must be a string".to_string(),
            ));
        }
        Ok(())
    }
}
