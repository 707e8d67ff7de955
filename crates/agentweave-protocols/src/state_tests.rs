use super::*;
use serde_json::json;

#[test]
fn test_state_key_display_and_parse() {
    let key = StateKey::workflow("wf-1");
    assert_eq!(key.to_string(), "workflow:wf-1");
    assert_eq!(StateKey::parse("workflow:wf-1").unwrap(), key);
    assert_eq!(StateKey::parse("task:wf-1:fetch").unwrap().id, "wf-1:fetch");
}

#[test]
fn test_state_key_parse_invalid() {
    assert!(StateKey::parse("nope").is_err());
    assert!(StateKey::parse("session:1").is_err());
    assert!(StateKey::parse("agent:").is_err());
}

#[test]
fn test_pattern() {
    assert_eq!(StateKey::pattern(EntityType::Agent), "agent:*");
}

#[test]
fn test_event_for_change() {
    let key = StateKey::agent("a");
    let created = StateEvent::for_change(&key, None, Some(json!(1)));
    assert_eq!(created.event_type, StateEventType::Created);
    assert_eq!(created.entity_type, EntityType::Agent);
    assert_eq!(created.entity_id, "a");

    let updated = StateEvent::for_change(&key, Some(json!(1)), Some(json!(2)));
    assert_eq!(updated.event_type, StateEventType::Updated);

    let deleted = StateEvent::for_change(&key, Some(json!(2)), None);
    assert_eq!(deleted.event_type, StateEventType::Deleted);
}

#[test]
fn test_event_filter() {
    let event = StateEvent::for_change(&StateKey::task("t1"), None, Some(json!({})));
    assert!(EventFilter::all().matches(&event));
    assert!(EventFilter::entity(EntityType::Task).matches(&event));
    assert!(!EventFilter::entity(EntityType::Agent).matches(&event));
    assert!(
        EventFilter::entity(EntityType::Task)
            .with_event_type(StateEventType::Created)
            .with_entity_id("t1")
            .matches(&event)
    );
    assert!(!EventFilter::all().with_entity_id("t2").matches(&event));
}

#[test]
fn test_event_serialization() {
    let event = StateEvent::for_change(&StateKey::workflow("w"), None, Some(json!({"x": 1})));
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "CREATED");
    assert_eq!(value["entity_type"], "WORKFLOW");
}

#[test]
fn test_query_options_matches() {
    let options = QueryOptions::pattern("task:*").where_eq("/metadata/status", json!("FAILED"));
    assert!(options.matches(&json!({"metadata": {"status": "FAILED"}})));
    assert!(!options.matches(&json!({"metadata": {"status": "COMPLETED"}})));
    assert!(!options.matches(&json!({})));
    assert!(QueryOptions::default().matches(&json!(null)));
}

#[tokio::test]
async fn test_subscription_filters_and_closes() {
    let (tx, rx) = broadcast::channel(8);
    let mut sub = StateSubscription::new(rx, EventFilter::entity(EntityType::Workflow));

    tx.send(StateEvent::for_change(&StateKey::agent("a"), None, Some(json!(1))))
        .unwrap();
    tx.send(StateEvent::for_change(&StateKey::workflow("w"), None, Some(json!(1))))
        .unwrap();
    drop(tx);

    let event = sub.recv().await.unwrap();
    assert_eq!(event.entity_id, "w");
    assert!(sub.recv().await.is_none());
}

#[tokio::test]
async fn test_subscription_into_stream() {
    let (tx, rx) = broadcast::channel(8);
    let stream = StateSubscription::new(rx, EventFilter::all().with_entity_id("b")).into_stream();

    tx.send(StateEvent::for_change(&StateKey::agent("a"), None, Some(json!(1))))
        .unwrap();
    tx.send(StateEvent::for_change(&StateKey::agent("b"), None, Some(json!(2))))
        .unwrap();
    drop(tx);

    let events: Vec<StateEvent> = stream.collect().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity_id, "b");
}
