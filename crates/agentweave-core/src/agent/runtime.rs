//! Agent struct and lifecycle operations.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentweave_protocols::{
    AbortSignal, AgentBehavior, AgentConfig, AgentError, AgentEvent, AgentOverrides,
    AgentSnapshot, AgentState, AgentStatus, MessageBroker, MessagePayload, Message, StateKey,
    StateStore, StateStoreExt, SubscriptionId,
};

use crate::messaging::MessageManager;
use crate::registry::AgentDescriptor;
use crate::task_manager::TaskManager;

const EVENT_CAPACITY: usize = 256;

pub(super) struct AgentInner {
    pub(super) config: RwLock<AgentConfig>,
    pub(super) behavior: Arc<dyn AgentBehavior>,
    pub(super) state: RwLock<AgentState>,
    pub(super) tasks: Mutex<TaskManager>,
    pub(super) aborts: Mutex<std::collections::HashMap<String, Arc<AbortSignal>>>,
    pub(super) handlers: RwLock<Option<Arc<MessageManager>>>,
    pub(super) events: RwLock<Option<broadcast::Sender<AgentEvent>>>,
    pub(super) running: AtomicBool,
    pub(super) terminated: AtomicBool,
    pub(super) heartbeat: Mutex<Option<CancellationToken>>,
    pub(super) broker: RwLock<Option<Arc<dyn MessageBroker>>>,
    pub(super) subscriptions: Mutex<Vec<SubscriptionId>>,
    pub(super) slots: RwLock<Option<Arc<tokio::sync::Semaphore>>>,
    pub(super) store: Option<Arc<dyn StateStore>>,
}

/// An agent: lifecycle state machine plus task execution.
///
/// Cheap to clone; clones share the same agent.
#[derive(Clone)]
pub struct Agent {
    pub(super) inner: Arc<AgentInner>,
}

impl Agent {
    pub fn new(config: AgentConfig, behavior: Arc<dyn AgentBehavior>) -> Self {
        Self::build(config, behavior, None)
    }

    /// Agent that persists its snapshot under `agent:<id>` on every change.
    pub fn with_store(
        config: AgentConfig,
        behavior: Arc<dyn AgentBehavior>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self::build(config, behavior, Some(store))
    }

    fn build(
        config: AgentConfig,
        behavior: Arc<dyn AgentBehavior>,
        store: Option<Arc<dyn StateStore>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(AgentInner {
                config: RwLock::new(config),
                behavior,
                state: RwLock::new(AgentState::default()),
                tasks: Mutex::new(TaskManager::new()),
                aborts: Mutex::new(std::collections::HashMap::new()),
                handlers: RwLock::new(None),
                events: RwLock::new(Some(events)),
                running: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                heartbeat: Mutex::new(None),
                broker: RwLock::new(None),
                subscriptions: Mutex::new(Vec::new()),
                slots: RwLock::new(None),
                store,
            }),
        }
    }

    pub fn id(&self) -> String {
        self.inner.config.read().id.clone()
    }

    pub fn config(&self) -> AgentConfig {
        self.inner.config.read().clone()
    }

    pub fn state(&self) -> AgentState {
        self.inner.state.read().clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.inner.state.read().status
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            config: self.config(),
            state: self.state(),
        }
    }

    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor::from(&*self.inner.config.read())
    }

    /// Copies of the tasks currently tracked by this agent.
    pub fn tasks(&self) -> Vec<agentweave_protocols::Task> {
        self.inner.tasks.lock().get_all_tasks()
    }

    /// Receive lifecycle and task events. Fails after `terminate`.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<AgentEvent>, AgentError> {
        self.inner
            .events
            .read()
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(AgentError::Terminated)
    }

    pub(super) fn ensure_not_terminated(&self) -> Result<(), AgentError> {
        if self.is_terminated() {
            Err(AgentError::Terminated)
        } else {
            Ok(())
        }
    }

    /// Merge `overrides`, register message handlers, run `on_initialize`
    /// and move to IDLE.
    pub async fn initialize(&self, overrides: Option<AgentOverrides>) -> Result<(), AgentError> {
        self.ensure_not_terminated()?;
        let status = self.status();
        if status != AgentStatus::Initializing {
            return Err(AgentError::InvalidState {
                operation: "initialize",
                status,
            });
        }

        if let Some(overrides) = overrides {
            self.inner.config.write().merge(overrides);
        }

        let mut manager = MessageManager::new();
        self.inner.behavior.setup_message_handlers(&mut manager);
        *self.inner.handlers.write() = Some(Arc::new(manager));

        self.inner.behavior.on_initialize().await?;
        self.set_status(AgentStatus::Idle).await;
        info!("Agent {} initialized", self.id());
        Ok(())
    }

    /// Start the heartbeat and mark the agent running.
    pub async fn start(&self) -> Result<(), AgentError> {
        self.ensure_not_terminated()?;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(AgentError::AlreadyRunning);
        }
        let status = self.status();
        if status == AgentStatus::Initializing {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(AgentError::InvalidState {
                operation: "start",
                status,
            });
        }

        if let Err(e) = self.inner.behavior.on_start().await {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let previous = {
            let mut state = self.inner.state.write();
            let previous = state.status;
            state.started_at = Some(Utc::now());
            if state.status == AgentStatus::Terminated {
                state.status = self.idle_or_busy(&state);
            }
            previous
        };
        self.spawn_heartbeat();
        self.state_changed(previous).await;
        info!("Agent {} started", self.id());
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), AgentError> {
        self.ensure_not_terminated()?;
        if !self.is_running() {
            return Err(AgentError::NotRunning);
        }
        let status = self.status();
        if status == AgentStatus::Paused {
            return Err(AgentError::InvalidState {
                operation: "pause",
                status,
            });
        }
        self.inner.behavior.on_pause().await?;
        self.set_status(AgentStatus::Paused).await;
        info!("Agent {} paused", self.id());
        Ok(())
    }

    /// Resume to BUSY when tasks are active, IDLE otherwise.
    pub async fn resume(&self) -> Result<(), AgentError> {
        self.ensure_not_terminated()?;
        if self.status() != AgentStatus::Paused {
            return Err(AgentError::NotPaused);
        }
        self.inner.behavior.on_resume().await?;
        let next = {
            let state = self.inner.state.read();
            self.idle_or_busy(&state)
        };
        self.set_status(next).await;
        info!("Agent {} resumed", self.id());
        Ok(())
    }

    /// Soft stop: the agent may be started again.
    pub async fn stop(&self) -> Result<(), AgentError> {
        self.ensure_not_terminated()?;
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Err(AgentError::NotRunning);
        }
        self.stop_heartbeat();
        self.set_status(AgentStatus::Terminated).await;
        self.inner.behavior.on_stop().await?;
        info!("Agent {} stopped", self.id());
        Ok(())
    }

    /// Hard, irreversible teardown. Detaches from the broker and releases
    /// every event listener.
    pub async fn terminate(&self) -> Result<(), AgentError> {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return Err(AgentError::Terminated);
        }
        if self.inner.running.swap(false, Ordering::SeqCst) {
            self.stop_heartbeat();
            if let Err(e) = self.inner.behavior.on_stop().await {
                warn!("Agent {} on_stop failed during terminate: {}", self.id(), e);
            }
        }

        self.set_status(AgentStatus::Terminated).await;
        self.detach().await;
        for signal in self.inner.aborts.lock().values() {
            signal.abort();
        }

        let hook = self.inner.behavior.on_terminate().await;
        self.inner.events.write().take();
        info!("Agent {} terminated", self.id());
        hook
    }

    pub(super) fn idle_or_busy(&self, state: &AgentState) -> AgentStatus {
        if state.current_tasks.is_empty() {
            AgentStatus::Idle
        } else {
            AgentStatus::Busy
        }
    }

    pub(super) async fn set_status(&self, next: AgentStatus) {
        let previous = {
            let mut state = self.inner.state.write();
            std::mem::replace(&mut state.status, next)
        };
        self.state_changed(previous).await;
    }

    /// Emit `StateChanged`, persist the snapshot and announce status
    /// changes on the broker.
    pub(super) async fn state_changed(&self, previous: AgentStatus) {
        let agent_id = self.id();
        let state = self.state();
        let status = state.status;
        self.emit(AgentEvent::StateChanged {
            agent_id: agent_id.clone(),
            previous,
            state,
        });
        self.persist().await;

        if previous != status {
            debug!("Agent {} {} -> {}", agent_id, previous, status);
            let payload = MessagePayload::AgentStatusUpdate {
                agent_id: agent_id.clone(),
                status,
            };
            self.broadcast(Message::new(agent_id, payload)).await;
        }
    }

    pub(super) fn emit(&self, event: AgentEvent) {
        if let Some(tx) = self.inner.events.read().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub(super) async fn persist(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let snapshot = self.snapshot();
        let key = StateKey::agent(&snapshot.config.id);
        if let Err(e) = store.save(&key, &snapshot).await {
            warn!("Failed to persist agent {}: {}", snapshot.config.id, e);
        }
    }

    fn spawn_heartbeat(&self) {
        let token = CancellationToken::new();
        if let Some(old) = self.inner.heartbeat.lock().replace(token.clone()) {
            old.cancel();
        }
        let interval_ms = self.inner.config.read().heartbeat_interval_ms.max(1);
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let period = std::time::Duration::from_millis(interval_ms);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        Agent { inner }.beat().await;
                    }
                }
            }
        });
    }

    fn stop_heartbeat(&self) {
        if let Some(token) = self.inner.heartbeat.lock().take() {
            token.cancel();
        }
    }

    async fn beat(&self) {
        let (status, at) = {
            let mut state = self.inner.state.write();
            let now = Utc::now();
            state.last_heartbeat = Some(now);
            (state.status, now)
        };
        self.state_changed(status).await;
        let agent_id = self.id();
        let payload = MessagePayload::AgentHeartbeat {
            agent_id: agent_id.clone(),
            at,
        };
        self.broadcast(Message::new(agent_id, payload)).await;
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
