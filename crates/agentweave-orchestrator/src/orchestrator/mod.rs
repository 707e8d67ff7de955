//! Workflow orchestrator.
//!
//! Every mutation of a workflow runs under the store's per-entity lock as
//! load, mutate, save. Side effects (assignments, status updates, timers)
//! are collected while mutating and applied only after the save succeeded,
//! so a failing store never leaves a half-applied transition behind.

mod effects;
mod events;
mod scheduler;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentweave_core::{AgentDescriptor, AgentDirectory};
use agentweave_protocols::{
    MessageBroker, MessageType, RetryStrategy, StateKey, StateStore, StateStoreExt, StepStatus,
    Subscription, SubscriptionId, Workflow, WorkflowConfig, WorkflowError, WorkflowStatus,
    WorkflowStepResult, generate_id,
};

use crate::dag;
use effects::Effects;
use events::{Event, ResultHandler};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sender id of assignments; results are addressed to it.
    pub id: String,
    /// Concurrency limit for workflows that declare none. Zero means
    /// unlimited.
    pub max_concurrency: usize,
    pub default_step_timeout_ms: Option<u64>,
    pub default_retry: Option<RetryStrategy>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            id: "orchestrator".to_string(),
            max_concurrency: 0,
            default_step_timeout_ms: None,
            default_retry: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_default_step_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_step_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_default_retry(mut self, retry: RetryStrategy) -> Self {
        self.default_retry = Some(retry);
        self
    }
}

/// Observable progress of a running workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    status: WorkflowStatus,
    stalled: bool,
}

impl Progress {
    fn of(workflow: &Workflow) -> Self {
        Self {
            status: workflow.status(),
            stalled: workflow.metadata.stalled,
        }
    }

    fn is_settled(&self) -> bool {
        self.status.is_terminal() || self.stalled
    }
}

/// Process-local handles of a non-terminal workflow.
struct ActiveWorkflow {
    progress: watch::Sender<Progress>,
    /// Cancels every timer armed for the workflow.
    timers: CancellationToken,
}

struct Inner {
    config: OrchestratorConfig,
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn StateStore>,
    agents: AgentDirectory,
    active: DashMap<String, ActiveWorkflow>,
    /// In-flight step count per agent id, across all workflows.
    load: Mutex<HashMap<String, usize>>,
    events: mpsc::UnboundedSender<Event>,
    subscription: Mutex<Option<SubscriptionId>>,
    shutdown: CancellationToken,
}

/// Drives workflows over a message broker and a state store.
///
/// Cheap to clone; clones share the same orchestrator.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    inner: Arc<Inner>,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator and subscribe it to `TASK_RESULT` messages
    /// addressed to `config.id`.
    pub async fn new(
        config: OrchestratorConfig,
        broker: Arc<dyn MessageBroker>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, WorkflowError> {
        let (events, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let orchestrator = Self {
            inner: Arc::new(Inner {
                config,
                broker,
                store,
                agents: AgentDirectory::new(),
                active: DashMap::new(),
                load: Mutex::new(HashMap::new()),
                events,
                subscription: Mutex::new(None),
                shutdown: shutdown.clone(),
            }),
        };

        let handler = Arc::new(ResultHandler::new(Arc::downgrade(&orchestrator.inner)));
        let subscription = orchestrator
            .inner
            .broker
            .subscribe(Subscription::new(
                orchestrator.id(),
                MessageType::TaskResult,
                handler,
            ))
            .await?;
        *orchestrator.inner.subscription.lock() = Some(subscription);

        events::spawn_event_loop(Arc::downgrade(&orchestrator.inner), receiver, shutdown);
        info!("Workflow orchestrator {} ready", orchestrator.id());
        Ok(orchestrator)
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Agents steps may be dispatched to.
    pub fn agents(&self) -> &AgentDirectory {
        &self.inner.agents
    }

    /// Make an agent known to the dispatcher, replacing any earlier entry.
    pub fn register_agent(&self, descriptor: AgentDescriptor) {
        debug!("Registered agent {} with orchestrator", descriptor.id);
        self.inner.agents.upsert(descriptor);
    }

    /// Steps currently dispatched to `agent_id` across all workflows.
    pub fn agent_load(&self, agent_id: &str) -> usize {
        self.inner.load.lock().get(agent_id).copied().unwrap_or(0)
    }

    /// Ids of workflows that have not reached a terminal status.
    pub fn active_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Start a workflow and return its id.
    ///
    /// An empty id is replaced by a generated one. Fails if the graph is
    /// invalid or a workflow with the same id is still running.
    pub async fn execute(&self, mut config: WorkflowConfig) -> Result<String, WorkflowError> {
        if config.id.is_empty() {
            config.id = generate_id();
        }
        dag::validate(&config)?;
        let workflow_id = config.id.clone();

        match self.inner.active.entry(workflow_id.clone()) {
            Entry::Occupied(_) => return Err(WorkflowError::AlreadyActive(workflow_id)),
            Entry::Vacant(slot) => {
                let (progress, _) = watch::channel(Progress {
                    status: WorkflowStatus::Pending,
                    stalled: false,
                });
                slot.insert(ActiveWorkflow {
                    progress,
                    timers: self.inner.shutdown.child_token(),
                });
            }
        }

        if let Err(e) = self.start(config).await {
            if let Some((_, active)) = self.inner.active.remove(&workflow_id) {
                active.timers.cancel();
            }
            return Err(e);
        }
        Ok(workflow_id)
    }

    async fn start(&self, config: WorkflowConfig) -> Result<(), WorkflowError> {
        let workflow_id = config.id.clone();
        let timeout_ms = config.timeout_ms;
        let steps = config.steps.len();
        {
            let key = StateKey::workflow(&workflow_id);
            let _guard = self.inner.store.lock(&key).await;
            self.inner.store.save(&key, &Workflow::new(config)).await?;
        }

        self.update(&workflow_id, |wf, fx| {
            wf.metadata.start_time = Some(Utc::now());
            self.set_status(wf, WorkflowStatus::InProgress, fx);
            self.dispatch_ready(wf, fx);
            self.settle(wf, fx);
            Ok(())
        })
        .await?;
        info!("Workflow {} started with {} steps", workflow_id, steps);

        if let Some(timeout_ms) = timeout_ms {
            self.schedule(
                &workflow_id,
                Duration::from_millis(timeout_ms),
                Event::WorkflowTimeout {
                    workflow_id: workflow_id.clone(),
                    timeout_ms,
                },
            );
        }
        Ok(())
    }

    /// Stop dispatching new steps. Results of steps already in flight are
    /// still recorded.
    pub async fn pause(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        self.update(workflow_id, |wf, fx| {
            let status = wf.status();
            if status != WorkflowStatus::InProgress {
                return Err(WorkflowError::InvalidState {
                    operation: "pause",
                    workflow_id: wf.id().to_string(),
                    status,
                });
            }
            self.set_status(wf, WorkflowStatus::Paused, fx);
            Ok(())
        })
        .await?;
        info!("Workflow {} paused", workflow_id);
        Ok(())
    }

    /// Resume a paused workflow and dispatch whatever became ready.
    pub async fn resume(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        self.update(workflow_id, |wf, fx| {
            let status = wf.status();
            if status != WorkflowStatus::Paused {
                return Err(WorkflowError::InvalidState {
                    operation: "resume",
                    workflow_id: wf.id().to_string(),
                    status,
                });
            }
            self.set_status(wf, WorkflowStatus::InProgress, fx);
            // Retries that came due while paused were held back.
            for (step_id, result) in &wf.metadata.step_results {
                if result.status == StepStatus::Retrying {
                    fx.retry(step_id, result.attempts, Duration::ZERO);
                }
            }
            self.dispatch_ready(wf, fx);
            self.settle(wf, fx);
            Ok(())
        })
        .await?;
        info!("Workflow {} resumed", workflow_id);
        Ok(())
    }

    /// Mark the workflow CANCELLED and ask agents to drop in-flight steps.
    ///
    /// Cancellation is cooperative: agents may still finish running tasks,
    /// but their results are ignored.
    pub async fn cancel(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        self.update(workflow_id, |wf, fx| {
            let status = wf.status();
            if status.is_terminal() {
                return Err(WorkflowError::InvalidState {
                    operation: "cancel",
                    workflow_id: wf.id().to_string(),
                    status,
                });
            }
            self.finish(wf, WorkflowStatus::Cancelled, None, fx);
            Ok(())
        })
        .await?;
        info!("Workflow {} cancelled", workflow_id);
        Ok(())
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, WorkflowError> {
        self.inner
            .store
            .load(&StateKey::workflow(workflow_id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }

    pub async fn get_status(&self, workflow_id: &str) -> Result<WorkflowStatus, WorkflowError> {
        Ok(self.get_workflow(workflow_id).await?.status())
    }

    /// The most recently dispatched step.
    pub async fn get_current_step(&self, workflow_id: &str) -> Result<Option<String>, WorkflowError> {
        Ok(self.get_workflow(workflow_id).await?.metadata.current_step)
    }

    pub async fn get_step_results(
        &self,
        workflow_id: &str,
    ) -> Result<BTreeMap<String, WorkflowStepResult>, WorkflowError> {
        Ok(self.get_workflow(workflow_id).await?.metadata.step_results)
    }

    /// Wait until the workflow is terminal or stalled and return it.
    pub async fn wait_for(
        &self,
        workflow_id: &str,
        timeout: Duration,
    ) -> Result<Workflow, WorkflowError> {
        let receiver = self
            .inner
            .active
            .get(workflow_id)
            .map(|active| active.progress.subscribe());

        if let Some(mut receiver) = receiver {
            let settled = tokio::time::timeout(timeout, async {
                // A closed channel means the workflow left the active set;
                // the stored snapshot is authoritative then.
                let _ = receiver.wait_for(Progress::is_settled).await;
            })
            .await;
            if settled.is_err() {
                return Err(WorkflowError::WaitTimeout(workflow_id.to_string()));
            }
        }
        self.get_workflow(workflow_id).await
    }

    /// Unsubscribe from the broker and stop all timers.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let subscription = self.inner.subscription.lock().take();
        if let Some(id) = subscription {
            if let Err(e) = self.inner.broker.unsubscribe(&id).await {
                warn!("Orchestrator unsubscribe failed: {}", e);
            }
        }
        info!("Workflow orchestrator {} stopped", self.id());
    }

    /// Run `mutate` on the stored workflow under its entity lock, persist
    /// the result and apply the collected effects.
    async fn update<R, F>(&self, workflow_id: &str, mutate: F) -> Result<R, WorkflowError>
    where
        R: Send,
        F: FnOnce(&mut Workflow, &mut Effects) -> Result<R, WorkflowError> + Send,
    {
        let key = StateKey::workflow(workflow_id);
        let _guard = self.inner.store.lock(&key).await;

        let mut workflow: Workflow = self
            .inner
            .store
            .load(&key)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        let before = workflow.clone();
        let mut fx = Effects::default();

        let result = match mutate(&mut workflow, &mut fx) {
            Ok(result) => result,
            Err(e) => {
                self.rollback_slots(&fx);
                return Err(e);
            }
        };

        if workflow != before {
            if let Err(e) = self.inner.store.save(&key, &workflow).await {
                self.rollback_slots(&fx);
                self.report_state_error(workflow_id, &e.to_string()).await;
                return Err(e.into());
            }
        }

        fx.progress = Some(Progress::of(&workflow));
        self.apply_effects(workflow_id, fx).await;
        Ok(result)
    }
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("id", &self.id())
            .field("active", &self.inner.active.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
