use super::*;
use crate::messaging::InMemoryBroker;
use agentweave_protocols::{
    AgentCommand, HandlerRegistrar, MessageError, MessageHandler, MessageType, Subscription,
    Task, TaskConfig, TaskContext, TaskError, TaskResult,
};
use agentweave_state::StateManager;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::mpsc;

/// Behavior driven by the task input: `{"outcome": "ok" | "reject" | "error", "sleep_ms": n}`.
#[derive(Default)]
struct Scripted {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl AgentBehavior for Scripted {
    async fn execute_task(&self, task: &Task, ctx: &TaskContext) -> Result<TaskResult, AgentError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let sleep_ms = task.config.input["sleep_ms"].as_u64().unwrap_or(0);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(sleep_ms);
        while tokio::time::Instant::now() < deadline && !ctx.is_aborted() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if ctx.is_aborted() {
            return Ok(TaskResult::failure("aborted"));
        }
        match task.config.input["outcome"].as_str().unwrap_or("ok") {
            "reject" => Ok(TaskResult::failure("rejected")),
            "error" => Err(AgentError::ExecutionFailed("scripted error".to_string())),
            _ => Ok(TaskResult::success(json!({ "echo": task.id() }))),
        }
    }
}

/// Forwards every received message into a channel.
struct Forward(mpsc::UnboundedSender<Message>);

#[async_trait]
impl MessageHandler for Forward {
    async fn handle(&self, message: &Message) -> Result<(), MessageError> {
        let _ = self.0.send(message.clone());
        Ok(())
    }
}

/// Scripted behavior that also answers `PING` messages.
struct Pinged {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl AgentBehavior for Pinged {
    async fn execute_task(&self, _task: &Task, _ctx: &TaskContext) -> Result<TaskResult, AgentError> {
        Ok(TaskResult::success(json!(null)))
    }

    fn setup_message_handlers(&self, registrar: &mut dyn HandlerRegistrar) {
        registrar.register_handler(MessageType::from("PING"), Arc::new(Forward(self.tx.clone())));
    }
}

fn config() -> AgentConfig {
    AgentConfig::new("worker", "Worker", "scripted").with_capabilities(["echo"])
}

fn task(id: &str, input: serde_json::Value) -> Task {
    Task::new(TaskConfig::new(id, "echo").with_input(input))
}

async fn started(config: AgentConfig) -> (Agent, Arc<Scripted>) {
    let behavior = Arc::new(Scripted::default());
    let agent = Agent::new(config, behavior.clone());
    agent.initialize(None).await.unwrap();
    agent.start().await.unwrap();
    (agent, behavior)
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<AgentEvent>, mut pred: F) -> AgentEvent
where
    F: FnMut(&AgentEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_initialize_moves_to_idle_and_merges_overrides() {
    let agent = Agent::new(config(), Arc::new(Scripted::default()));
    assert_eq!(agent.status(), AgentStatus::Initializing);

    let overrides = AgentOverrides {
        name: Some("Renamed".to_string()),
        max_concurrent_tasks: Some(4),
        ..Default::default()
    };
    agent.initialize(Some(overrides)).await.unwrap();

    assert_eq!(agent.status(), AgentStatus::Idle);
    let config = agent.config();
    assert_eq!(config.id, "worker");
    assert_eq!(config.name, "Renamed");
    assert_eq!(config.max_concurrent_tasks, 4);

    let err = agent.initialize(None).await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidState { operation: "initialize", .. }));
}

#[tokio::test]
async fn test_start_requires_initialize() {
    let agent = Agent::new(config(), Arc::new(Scripted::default()));
    let err = agent.start().await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidState { operation: "start", .. }));
    assert!(!agent.is_running());
}

#[tokio::test]
async fn test_start_twice_fails() {
    let (agent, _) = started(config()).await;
    assert!(agent.is_running());
    assert!(agent.state().started_at.is_some());
    assert!(matches!(agent.start().await, Err(AgentError::AlreadyRunning)));
}

#[tokio::test]
async fn test_pause_before_start_fails() {
    let agent = Agent::new(config(), Arc::new(Scripted::default()));
    agent.initialize(None).await.unwrap();
    assert!(matches!(agent.pause().await, Err(AgentError::NotRunning)));
    assert!(matches!(agent.resume().await, Err(AgentError::NotPaused)));
    assert!(matches!(agent.stop().await, Err(AgentError::NotRunning)));
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (agent, _) = started(config()).await;

    agent.pause().await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Paused);
    assert!(matches!(
        agent.pause().await,
        Err(AgentError::InvalidState { operation: "pause", .. })
    ));

    let err = agent.handle_task(task("t-1", json!({}))).await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidState { status: AgentStatus::Paused, .. }));

    agent.resume().await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Idle);
}

#[tokio::test]
async fn test_resume_returns_to_busy_while_task_runs() {
    let (agent, _) = started(config()).await;
    let mut events = agent.subscribe().unwrap();

    let runner = agent.clone();
    let handle =
        tokio::spawn(async move { runner.handle_task(task("slow", json!({ "sleep_ms": 300 }))).await });
    wait_for(&mut events, |e| matches!(e, AgentEvent::TaskStarted { .. })).await;
    assert_eq!(agent.status(), AgentStatus::Busy);

    agent.pause().await.unwrap();
    agent.resume().await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Busy);

    let result = handle.await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(agent.status(), AgentStatus::Idle);
}

#[tokio::test]
async fn test_task_finishing_while_paused_keeps_paused() {
    let (agent, _) = started(config()).await;
    let mut events = agent.subscribe().unwrap();

    let runner = agent.clone();
    let handle =
        tokio::spawn(async move { runner.handle_task(task("slow", json!({ "sleep_ms": 100 }))).await });
    wait_for(&mut events, |e| matches!(e, AgentEvent::TaskStarted { .. })).await;
    agent.pause().await.unwrap();

    handle.await.unwrap().unwrap();
    assert_eq!(agent.status(), AgentStatus::Paused);
    assert_eq!(agent.state().completed_tasks, 1);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let (agent, _) = started(config()).await;
    agent.stop().await.unwrap();
    assert!(!agent.is_running());
    assert_eq!(agent.status(), AgentStatus::Terminated);

    agent.start().await.unwrap();
    assert!(agent.is_running());
    assert_eq!(agent.status(), AgentStatus::Idle);
}

#[tokio::test]
async fn test_everything_fails_after_terminate() {
    let (agent, _) = started(config()).await;
    agent.terminate().await.unwrap();

    assert!(agent.is_terminated());
    assert!(!agent.is_running());
    assert_eq!(agent.status(), AgentStatus::Terminated);
    assert!(matches!(agent.start().await, Err(AgentError::Terminated)));
    assert!(matches!(agent.pause().await, Err(AgentError::Terminated)));
    assert!(matches!(agent.resume().await, Err(AgentError::Terminated)));
    assert!(matches!(agent.stop().await, Err(AgentError::Terminated)));
    assert!(matches!(agent.terminate().await, Err(AgentError::Terminated)));
    assert!(matches!(agent.subscribe(), Err(AgentError::Terminated)));
    assert!(matches!(
        agent.handle_task(task("late", json!({}))).await,
        Err(AgentError::Terminated)
    ));
}

#[tokio::test]
async fn test_terminate_closes_event_streams() {
    let (agent, _) = started(config()).await;
    let mut events = agent.subscribe().unwrap();
    agent.terminate().await.unwrap();

    loop {
        match events.recv().await {
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
            Err(e) => panic!("unexpected {e:?}"),
        }
    }
}

#[tokio::test]
async fn test_task_accounting() {
    let (agent, _) = started(config()).await;

    let outcomes = ["ok", "ok", "reject", "error", "ok", "error"];
    for (i, outcome) in outcomes.iter().enumerate() {
        let _ = agent
            .handle_task(task(&format!("t-{i}"), json!({ "outcome": outcome })))
            .await;
    }

    let state = agent.state();
    assert_eq!(state.completed_tasks, 3);
    assert_eq!(state.failed_tasks, 3);
    assert!(state.current_tasks.is_empty());
    assert!(agent.tasks().is_empty());
}

#[tokio::test]
async fn test_error_then_recovery() {
    let (agent, _) = started(config()).await;

    let err = agent
        .handle_task(task("bad", json!({ "outcome": "error" })))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ExecutionFailed(_)));
    assert_eq!(agent.status(), AgentStatus::Error);

    let result = agent.handle_task(task("good", json!({}))).await.unwrap();
    assert!(result.success);
    assert_eq!(result.data, json!({ "echo": "good" }));
    assert_eq!(agent.status(), AgentStatus::Idle);
}

#[tokio::test]
async fn test_rejected_result_does_not_enter_error() {
    let (agent, _) = started(config()).await;
    let result = agent
        .handle_task(task("no", json!({ "outcome": "reject" })))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(agent.status(), AgentStatus::Idle);
    assert_eq!(agent.state().failed_tasks, 1);
}

#[tokio::test]
async fn test_task_timeout() {
    let (agent, _) = started(config().with_task_timeout_ms(50)).await;

    let err = agent
        .handle_task(task("slow", json!({ "sleep_ms": 1000 })))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Timeout(50)));
    assert_eq!(agent.status(), AgentStatus::Error);
    assert_eq!(agent.state().failed_tasks, 1);
    assert!(agent.state().current_tasks.is_empty());
}

#[tokio::test]
async fn test_missing_capabilities_rejected_without_counting() {
    let (agent, _) = started(config()).await;
    let mut t = task("needs-gpu", json!({}));
    t.config.required_capabilities = vec!["echo".to_string(), "gpu".to_string()];

    let err = agent.handle_task(t).await.unwrap_err();
    match err {
        AgentError::MissingCapabilities(missing) => assert_eq!(missing, vec!["gpu".to_string()]),
        other => panic!("unexpected {other:?}"),
    }
    let state = agent.state();
    assert_eq!(state.failed_tasks, 0);
    assert_eq!(state.status, AgentStatus::Idle);
}

#[tokio::test]
async fn test_task_events() {
    let (agent, _) = started(config()).await;
    let mut events = agent.subscribe().unwrap();

    agent.handle_task(task("t-1", json!({}))).await.unwrap();
    let _ = agent.handle_task(task("t-2", json!({ "outcome": "error" }))).await;

    let started = wait_for(&mut events, |e| matches!(e, AgentEvent::TaskStarted { .. })).await;
    assert_eq!(started.agent_id(), "worker");
    let completed = wait_for(&mut events, |e| matches!(e, AgentEvent::TaskCompleted { .. })).await;
    assert!(matches!(completed, AgentEvent::TaskCompleted { success: true, .. }));
    let failed = wait_for(&mut events, |e| matches!(e, AgentEvent::TaskFailed { .. })).await;
    match failed {
        AgentEvent::TaskFailed { task_id, .. } => assert_eq!(task_id, "t-2"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_cancel_task_aborts_execution() {
    let (agent, _) = started(config()).await;
    let mut events = agent.subscribe().unwrap();

    let runner = agent.clone();
    let handle = tokio::spawn(async move {
        runner
            .handle_task(task("long", json!({ "sleep_ms": 5000 })))
            .await
    });
    wait_for(&mut events, |e| matches!(e, AgentEvent::TaskStarted { .. })).await;

    assert!(agent.cancel_task("long"));
    assert!(!agent.cancel_task("unknown"));

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!result.success);
    assert!(agent.state().current_tasks.is_empty());
}

#[tokio::test]
async fn test_newer_attempt_supersedes_running_task() {
    let (agent, _) = started(config()).await;
    let mut events = agent.subscribe().unwrap();

    let runner = agent.clone();
    let first = tokio::spawn(async move {
        runner
            .handle_task(task("fetch", json!({ "sleep_ms": 5000 })))
            .await
    });
    wait_for(&mut events, |e| matches!(e, AgentEvent::TaskStarted { .. })).await;

    let same_attempt = agent.handle_task(task("fetch", json!({}))).await;
    assert!(matches!(
        same_attempt,
        Err(AgentError::Task(TaskError::AlreadyExists(_)))
    ));

    let mut retry = task("fetch", json!({}));
    retry.metadata.attempts = 2;
    let result = agent.handle_task(retry).await.unwrap();
    assert!(result.success);

    let old = tokio::time::timeout(Duration::from_secs(2), first)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!old.success);

    let state = agent.state();
    assert!(state.current_tasks.is_empty());
    assert!(agent.tasks().is_empty());
    assert_eq!(state.completed_tasks, 1);
    assert_eq!(state.failed_tasks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_updates_state_until_stopped() {
    let (agent, _) = started(config().with_heartbeat_interval_ms(100)).await;
    assert!(agent.state().last_heartbeat.is_none());

    tokio::time::sleep(Duration::from_millis(250)).await;
    let beat = agent.state().last_heartbeat;
    assert!(beat.is_some());

    agent.stop().await.unwrap();
    let after_stop = agent.state().last_heartbeat;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(agent.state().last_heartbeat, after_stop);
}

#[tokio::test]
async fn test_snapshot_persisted_on_change() {
    let store = Arc::new(StateManager::in_memory());
    let agent = Agent::with_store(config(), Arc::new(Scripted::default()), store.clone());
    agent.initialize(None).await.unwrap();
    agent.start().await.unwrap();

    let key = StateKey::agent("worker");
    let snapshot: AgentSnapshot = store.load(&key).await.unwrap().unwrap();
    assert_eq!(snapshot.state.status, AgentStatus::Idle);
    assert_eq!(snapshot.config.agent_type, "scripted");

    agent.handle_task(task("t-1", json!({}))).await.unwrap();
    let snapshot: AgentSnapshot = store.load(&key).await.unwrap().unwrap();
    assert_eq!(snapshot.state.completed_tasks, 1);

    agent.pause().await.unwrap();
    let snapshot: AgentSnapshot = store.load(&key).await.unwrap().unwrap();
    assert_eq!(snapshot.state.status, AgentStatus::Paused);
}

#[tokio::test]
async fn test_attach_requires_initialize() {
    let agent = Agent::new(config(), Arc::new(Scripted::default()));
    let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
    let err = agent.attach(broker).await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidState { operation: "attach", .. }));
}

async fn attached(config: AgentConfig) -> (Agent, Arc<Scripted>, InMemoryBroker, mpsc::UnboundedReceiver<Message>) {
    let (agent, behavior) = started(config).await;
    let broker = InMemoryBroker::new();
    agent.attach(Arc::new(broker.clone())).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    broker
        .subscribe(Subscription::new(
            "orchestrator",
            MessageType::TaskResult,
            Arc::new(Forward(tx)),
        ))
        .await
        .unwrap();
    (agent, behavior, broker, rx)
}

fn assignment(t: Task) -> Message {
    Message::new("orchestrator", MessagePayload::TaskAssignment { task: t }).to("worker")
}

#[tokio::test]
async fn test_assignment_produces_task_result() {
    let (_agent, _, broker, mut results) = attached(config()).await;

    let mut t = task("wf:step", json!({}));
    t.metadata.attempts = 2;
    let message = assignment(t);
    let message_id = message.id.clone();
    broker.publish(message).await.unwrap();

    let reply = next_message(&mut results).await;
    assert_eq!(reply.sender, "worker");
    assert_eq!(reply.recipient.as_deref(), Some("orchestrator"));
    assert_eq!(reply.correlation_id.as_deref(), Some(message_id.as_str()));
    match reply.payload {
        MessagePayload::TaskResult {
            task_id,
            agent_id,
            attempt,
            result,
        } => {
            assert_eq!(task_id, "wf:step");
            assert_eq!(agent_id, "worker");
            assert_eq!(attempt, 2);
            assert!(result.success);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_assignment_error_reported_as_failure() {
    let (_agent, _, broker, mut results) = attached(config()).await;

    broker
        .publish(assignment(task("boom", json!({ "outcome": "error" }))))
        .await
        .unwrap();

    let reply = next_message(&mut results).await;
    match reply.payload {
        MessagePayload::TaskResult { result, .. } => {
            assert!(!result.success);
            assert!(result.error.unwrap().contains("scripted error"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_assignments_respect_concurrency_limit() {
    let (_agent, behavior, broker, mut results) =
        attached(config().with_max_concurrent_tasks(2)).await;

    for i in 0..5 {
        broker
            .publish(assignment(task(&format!("t-{i}"), json!({ "sleep_ms": 50 }))))
            .await
            .unwrap();
    }
    for _ in 0..5 {
        next_message(&mut results).await;
    }
    assert!(behavior.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_cancel_command_suppresses_result() {
    let (agent, _, broker, mut results) = attached(config()).await;
    let mut events = agent.subscribe().unwrap();

    broker
        .publish(assignment(task("long", json!({ "sleep_ms": 5000 }))))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, AgentEvent::TaskStarted { .. })).await;

    let cancel = Message::new(
        "orchestrator",
        MessagePayload::Command(AgentCommand::CancelTask {
            task_id: "long".to_string(),
        }),
    )
    .to("worker");
    broker.publish(cancel).await.unwrap();

    wait_for(&mut events, |e| matches!(e, AgentEvent::TaskCompleted { .. })).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    broker.flush().await;
    assert!(results.try_recv().is_err());
}

#[tokio::test]
async fn test_pause_command() {
    let (agent, _, broker, _results) = attached(config()).await;

    let pause = Message::new("ops", MessagePayload::Command(AgentCommand::Pause)).to("worker");
    broker.publish(pause).await.unwrap();
    broker.flush().await;
    assert_eq!(agent.status(), AgentStatus::Paused);
}

#[tokio::test]
async fn test_status_changes_are_broadcast() {
    let (agent, _, broker, _results) = attached(config()).await;
    let (tx, mut updates) = mpsc::unbounded_channel();
    broker
        .subscribe(Subscription::new(
            "observer",
            MessageType::AgentStatusUpdate,
            Arc::new(Forward(tx)),
        ))
        .await
        .unwrap();

    agent.pause().await.unwrap();

    let update = next_message(&mut updates).await;
    assert!(update.is_broadcast());
    assert_eq!(
        update.payload,
        MessagePayload::AgentStatusUpdate {
            agent_id: "worker".to_string(),
            status: AgentStatus::Paused,
        }
    );
}

#[tokio::test]
async fn test_domain_handlers_receive_messages() {
    let (tx, mut pings) = mpsc::unbounded_channel();
    let agent = Agent::new(config(), Arc::new(Pinged { tx }));
    agent.initialize(None).await.unwrap();
    let broker = InMemoryBroker::new();
    agent.attach(Arc::new(broker.clone())).await.unwrap();

    broker
        .publish(Message::custom("PING", "client", json!({ "n": 1 })).to("worker"))
        .await
        .unwrap();

    let ping = next_message(&mut pings).await;
    assert_eq!(ping.payload, MessagePayload::Custom(json!({ "n": 1 })));
}

#[tokio::test]
async fn test_terminate_detaches_from_broker() {
    let (agent, _, broker, _results) = attached(config()).await;
    // Two built-in subscriptions plus the test's result listener.
    assert_eq!(broker.subscription_count(), 3);

    agent.terminate().await.unwrap();
    assert_eq!(broker.subscription_count(), 1);

    let err = broker
        .publish(assignment(task("late", json!({}))))
        .await
        .unwrap_err();
    assert!(matches!(err, MessageError::Undeliverable { .. }));
}
