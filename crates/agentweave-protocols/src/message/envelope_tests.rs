use super::*;
use crate::message::AgentCommand;
use crate::task::{Task, TaskConfig, TaskResult};

fn result_payload() -> MessagePayload {
    MessagePayload::TaskResult {
        task_id: "wf:a".to_string(),
        agent_id: "agent-1".to_string(),
        attempt: 1,
        result: TaskResult::success(serde_json::json!({"ok": true})),
    }
}

#[test]
fn test_new_infers_type() {
    let msg = Message::new("agent-1", result_payload());
    assert_eq!(msg.message_type, MessageType::TaskResult);
    assert_eq!(msg.priority, DEFAULT_PRIORITY);
    assert!(msg.is_broadcast());
    assert!(msg.validate().is_ok());
}

#[test]
fn test_custom_message() {
    let msg = Message::custom("SEARCH_REQUEST", "agent-1", serde_json::json!({"q": "rust"}));
    assert_eq!(msg.message_type, MessageType::Custom("SEARCH_REQUEST".to_string()));
    assert!(msg.validate().is_ok());
}

#[test]
fn test_to_sets_recipient() {
    let msg = Message::new("o", MessagePayload::Command(AgentCommand::Pause)).to("agent-2");
    assert_eq!(msg.recipient.as_deref(), Some("agent-2"));
    assert!(!msg.is_broadcast());
}

#[test]
fn test_validate_type_mismatch() {
    let mut msg = Message::new("agent-1", result_payload());
    msg.message_type = MessageType::TaskAssignment;
    assert!(matches!(msg.validate(), Err(MessageError::Validation(_))));
}

#[test]
fn test_validate_custom_payload_on_builtin_type() {
    let mut msg = Message::custom("X", "agent-1", serde_json::json!(1));
    msg.message_type = MessageType::Command;
    assert!(msg.validate().is_err());
}

#[test]
fn test_validate_rejects_empty_sender_and_priority() {
    let msg = Message::new("", result_payload());
    assert!(msg.validate().is_err());

    let msg = Message::new("a", result_payload()).with_priority(11);
    assert!(msg.validate().is_err());

    let msg = Message::new("a", result_payload()).with_priority(10);
    assert!(msg.validate().is_ok());
}

#[test]
fn test_reply_addresses_sender() {
    let request = Message::custom("PING", "agent-1", serde_json::json!({}));
    let reply = request.reply("agent-2", MessagePayload::Custom(serde_json::json!("pong")));
    assert_eq!(reply.recipient.as_deref(), Some("agent-1"));
    assert_eq!(reply.correlation_id.as_deref(), Some(request.id.as_str()));
}

#[test]
fn test_reply_prefers_reply_to() {
    let request = Message::custom("PING", "agent-1", serde_json::json!({}))
        .with_reply_to("inbox-7")
        .with_correlation_id("corr-1");
    let reply = request.reply("agent-2", MessagePayload::Custom(serde_json::json!("pong")));
    assert_eq!(reply.recipient.as_deref(), Some("inbox-7"));
    assert_eq!(reply.correlation_id.as_deref(), Some("corr-1"));
}

#[test]
fn test_ttl_expiry() {
    let msg = Message::new("a", result_payload()).with_ttl_ms(1_000);
    assert!(!msg.is_expired_at(msg.timestamp));
    assert!(msg.is_expired_at(msg.timestamp + Duration::seconds(2)));

    let no_ttl = Message::new("a", result_payload());
    assert!(!no_ttl.is_expired_at(no_ttl.timestamp + Duration::days(365)));
}

#[test]
fn test_json_shape() {
    let task = Task::new(TaskConfig::new("wf:a", "fetch"));
    let msg = Message::new("orchestrator", MessagePayload::TaskAssignment { task }).to("agent-1");
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "TASK_ASSIGNMENT");
    assert_eq!(value["payload"]["kind"], "TASK_ASSIGNMENT");
    assert_eq!(value["payload"]["data"]["task"]["config"]["id"], "wf:a");
    assert!(value.get("signature").is_none());
}

#[test]
fn test_broadcast_round_trip_keeps_none_recipient() {
    let msg = Message::new("a", result_payload());
    let json = serde_json::to_string(&msg).unwrap();
    let back: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(back, msg);
    assert!(back.recipient.is_none());
}
