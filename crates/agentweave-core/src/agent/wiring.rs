//! Broker wiring: task assignments, commands and domain handlers.

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use agentweave_protocols::{
    AgentCommand, AgentError, Message, MessageBroker, MessageError, MessageHandler,
    MessagePayload, MessageType, Subscription, TaskResult,
};

use super::runtime::{Agent, AgentInner};

impl Agent {
    /// Subscribe this agent to `broker`.
    ///
    /// The agent receives TASK_ASSIGNMENT and COMMAND messages addressed to
    /// it (or broadcast), plus every type its behavior registered a handler
    /// for. At most `max_concurrent_tasks` assignments execute at once.
    pub async fn attach(&self, broker: Arc<dyn MessageBroker>) -> Result<(), AgentError> {
        self.ensure_not_terminated()?;
        let handlers = self.inner.handlers.read().clone().ok_or(AgentError::InvalidState {
            operation: "attach",
            status: self.status(),
        })?;
        if self.inner.broker.read().is_some() {
            self.detach().await;
        }

        let (agent_id, slots) = {
            let config = self.inner.config.read();
            (config.id.clone(), config.max_concurrent_tasks.max(1))
        };
        *self.inner.slots.write() = Some(Arc::new(Semaphore::new(slots)));

        let weak = Arc::downgrade(&self.inner);
        let mut subscriptions = vec![
            Subscription::new(
                agent_id.clone(),
                MessageType::TaskAssignment,
                Arc::new(AssignmentHandler { agent: weak.clone() }),
            ),
            Subscription::new(
                agent_id.clone(),
                MessageType::Command,
                Arc::new(CommandHandler { agent: weak.clone() }),
            ),
        ];
        for message_type in handlers.message_types() {
            subscriptions.push(Subscription::new(
                agent_id.clone(),
                message_type,
                Arc::new(DomainHandler {
                    agent: weak.clone(),
                }),
            ));
        }

        let mut ids = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            match broker.subscribe(subscription).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in &ids {
                        let _ = broker.unsubscribe(id).await;
                    }
                    return Err(e.into());
                }
            }
        }

        *self.inner.subscriptions.lock() = ids;
        *self.inner.broker.write() = Some(broker);
        info!("Agent {} attached to broker", agent_id);
        Ok(())
    }

    /// Drop every broker subscription held by this agent.
    pub async fn detach(&self) {
        let broker = self.inner.broker.write().take();
        let ids = std::mem::take(&mut *self.inner.subscriptions.lock());
        if let Some(broker) = broker {
            for id in ids {
                if let Err(e) = broker.unsubscribe(&id).await {
                    debug!("Unsubscribe {} failed: {}", id, e);
                }
            }
        }
    }

    pub(super) fn broker(&self) -> Option<Arc<dyn MessageBroker>> {
        self.inner.broker.read().clone()
    }

    /// Best-effort publish used for status and heartbeat announcements.
    pub(super) async fn broadcast(&self, message: Message) {
        if let Some(broker) = self.broker() {
            if let Err(e) = broker.publish(message).await {
                debug!("Agent {} announcement not published: {}", self.id(), e);
            }
        }
    }

    /// Run an assignment and report the result to its sender.
    async fn run_assignment(&self, message: Message) {
        let MessagePayload::TaskAssignment { task } = message.payload.clone() else {
            return;
        };
        let slots = self.inner.slots.read().clone();
        let _permit = match slots {
            Some(slots) => match slots.acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            None => None,
        };

        let agent_id = self.id();
        let task_id = task.id().to_string();
        let attempt = task.metadata.attempts;
        let execution = self.execute(task).await;
        if execution.cancelled {
            info!("Agent {} dropping result of cancelled task {}", agent_id, task_id);
            return;
        }

        let result = match execution.result {
            Ok(result) => result,
            Err(e) => TaskResult::failure(e.to_string()),
        };
        let reply = message.reply(
            agent_id.clone(),
            MessagePayload::TaskResult {
                task_id: task_id.clone(),
                agent_id: agent_id.clone(),
                attempt,
                result,
            },
        );
        let Some(broker) = self.broker() else {
            warn!("Agent {} detached before reporting {}", agent_id, task_id);
            return;
        };
        if let Err(e) = broker.publish(reply).await {
            error!("Agent {} failed to report {}: {}", agent_id, task_id, e);
        }
    }

    async fn run_command(&self, command: AgentCommand) -> Result<(), AgentError> {
        match command {
            AgentCommand::CancelTask { task_id } => {
                if !self.cancel_task(&task_id) {
                    debug!("Agent {} has no task {} to cancel", self.id(), task_id);
                }
                Ok(())
            }
            AgentCommand::Pause => self.pause().await,
            AgentCommand::Resume => self.resume().await,
            AgentCommand::Stop => self.stop().await,
        }
    }
}

struct AssignmentHandler {
    agent: Weak<AgentInner>,
}

#[async_trait]
impl MessageHandler for AssignmentHandler {
    async fn handle(&self, message: &Message) -> Result<(), MessageError> {
        if !matches!(message.payload, MessagePayload::TaskAssignment { .. }) {
            return Err(MessageError::Validation(
                "TASK_ASSIGNMENT without a task".to_string(),
            ));
        }
        let Some(inner) = self.agent.upgrade() else {
            return Ok(());
        };
        let agent = Agent { inner };
        let message = message.clone();
        // Runs detached so queued assignments can use free slots.
        tokio::spawn(async move { agent.run_assignment(message).await });
        Ok(())
    }
}

struct CommandHandler {
    agent: Weak<AgentInner>,
}

#[async_trait]
impl MessageHandler for CommandHandler {
    async fn handle(&self, message: &Message) -> Result<(), MessageError> {
        let MessagePayload::Command(command) = &message.payload else {
            return Err(MessageError::Validation("COMMAND without a command".to_string()));
        };
        let Some(inner) = self.agent.upgrade() else {
            return Ok(());
        };
        Agent { inner }
            .run_command(command.clone())
            .await
            .map_err(|e| MessageError::Handler(e.to_string()))
    }
}

struct DomainHandler {
    agent: Weak<AgentInner>,
}

#[async_trait]
impl MessageHandler for DomainHandler {
    async fn handle(&self, message: &Message) -> Result<(), MessageError> {
        let Some(inner) = self.agent.upgrade() else {
            return Ok(());
        };
        let handlers = inner.handlers.read().clone();
        match handlers {
            Some(handlers) => handlers.dispatch(message).await,
            None => Err(MessageError::NoHandler(message.message_type.clone())),
        }
    }
}
