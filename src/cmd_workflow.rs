//! `run` and `validate` subcommand handlers.

use anyhow::Context;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use agentweave_config::{Config, StateBackend};
use agentweave_core::{Agent, BrokerConfig, InMemoryBroker};
use agentweave_orchestrator::{
    OrchestratorConfig, SimpleConditionEvaluator, WorkflowDefinition, WorkflowOrchestrator, dag,
};
use agentweave_protocols::{
    AgentConfig, RetryStrategy, StateStore, StorageAdapter, Workflow, WorkflowConfig,
    WorkflowStatus,
};
use agentweave_state::{FileStorageAdapter, MemoryStorageAdapter, StateManager};

use crate::echo::EchoBehavior;

async fn load_workflow(path: &Path) -> anyhow::Result<WorkflowConfig> {
    let definition = WorkflowDefinition::load(path)
        .await
        .with_context(|| format!("cannot load {}", path.display()))?;
    let config = definition
        .into_config(&SimpleConditionEvaluator)
        .await
        .with_context(|| format!("invalid workflow {}", path.display()))?;
    Ok(config)
}

/// Print the steps of a definition in dependency order.
pub(crate) async fn validate(path: &Path) -> anyhow::Result<()> {
    let config = load_workflow(path).await?;
    let order = dag::topological_order(&config)?;
    println!(
        "Workflow '{}' is valid: {} step(s)",
        config.name,
        config.steps.len()
    );
    for (index, step_id) in order.iter().enumerate() {
        let Some(step) = config.step(step_id) else {
            continue;
        };
        if step.dependencies.is_empty() {
            println!("  {}. {} -> {}", index + 1, step.id, step.agent_id);
        } else {
            println!(
                "  {}. {} -> {} (after {})",
                index + 1,
                step.id,
                step.agent_id,
                step.dependencies.join(", ")
            );
        }
    }
    Ok(())
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<StateManager>> {
    let adapter: Arc<dyn StorageAdapter> = match config.state.backend {
        StateBackend::Memory => Arc::new(MemoryStorageAdapter::new()),
        StateBackend::File => {
            let path = config
                .state
                .resolved_path()
                .context("file state backend needs state.path")?;
            info!("File state store at {}", path.display());
            Arc::new(FileStorageAdapter::new(path).await?)
        }
    };
    Ok(Arc::new(StateManager::with_capacity(
        adapter,
        config.state.event_capacity,
    )))
}

fn orchestrator_config(config: &Config) -> OrchestratorConfig {
    let settings = &config.orchestrator;
    let mut orchestrator = OrchestratorConfig::default()
        .with_id(settings.id.clone())
        .with_max_concurrency(settings.max_concurrency);
    if let Some(secs) = settings.default_step_timeout_secs {
        orchestrator = orchestrator.with_default_step_timeout_ms(secs * 1000);
    }
    if let Some(retry) = &settings.default_retry {
        orchestrator = orchestrator.with_default_retry(
            RetryStrategy::new(retry.max_attempts)
                .with_initial_delay_ms(retry.initial_delay_ms)
                .with_backoff_multiplier(retry.backoff_multiplier),
        );
    }
    orchestrator
}

/// One echo agent per agent id the workflow names, declaring every
/// capability its steps require.
fn agent_configs(workflow: &WorkflowConfig, config: &Config) -> Vec<AgentConfig> {
    let mut capabilities: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for step in &workflow.steps {
        let caps = capabilities.entry(step.agent_id.as_str()).or_default();
        for capability in &step.task.required_capabilities {
            if !caps.contains(capability) {
                caps.push(capability.clone());
            }
        }
    }

    capabilities
        .into_iter()
        .map(|(agent_id, caps)| {
            let mut agent = AgentConfig::new(agent_id, agent_id, "echo")
                .with_capabilities(caps)
                .with_max_concurrent_tasks(config.agent.max_concurrent_tasks)
                .with_heartbeat_interval_ms(config.agent.heartbeat_interval_secs * 1000);
            if let Some(secs) = config.agent.task_timeout_secs {
                agent = agent.with_task_timeout_ms(secs * 1000);
            }
            agent
        })
        .collect()
}

fn print_summary(workflow: &Workflow) {
    println!("Workflow {} finished as {}", workflow.id(), workflow.status());
    if workflow.metadata.stalled {
        println!("  (stalled: remaining steps cannot run)");
    }
    for (step_id, result) in &workflow.metadata.step_results {
        match &result.error {
            Some(error) => println!(
                "  {:<20} {:<12} attempts={} error={}",
                step_id, result.status.as_str(), result.attempts, error
            ),
            None => println!(
                "  {:<20} {:<12} attempts={}",
                step_id, result.status.as_str(), result.attempts
            ),
        }
    }
}

/// Run a workflow definition to completion against echo agents.
pub(crate) async fn run(
    config: &Config,
    path: &Path,
    timeout: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let workflow = load_workflow(path).await?;

    let broker = InMemoryBroker::with_config(BrokerConfig {
        queue_warn_threshold: config.broker.queue_warn_threshold,
    });
    let store = build_store(config).await?;
    let orchestrator = WorkflowOrchestrator::new(
        orchestrator_config(config),
        Arc::new(broker.clone()),
        store.clone(),
    )
    .await?;

    let mut agents = Vec::new();
    for agent_config in agent_configs(&workflow, config) {
        let store: Arc<dyn StateStore> = store.clone();
        let agent = Agent::with_store(agent_config, Arc::new(EchoBehavior), store);
        agent.initialize(None).await?;
        agent.start().await?;
        agent.attach(Arc::new(broker.clone())).await?;
        orchestrator.register_agent(agent.descriptor());
        agents.push(agent);
    }
    info!("Started {} echo agent(s)", agents.len());

    let workflow_id = orchestrator.execute(workflow).await?;
    let outcome = tokio::select! {
        outcome = orchestrator.wait_for(&workflow_id, timeout) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; cancelling workflow {}", workflow_id);
            orchestrator.cancel(&workflow_id).await?;
            orchestrator.get_workflow(&workflow_id).await
        }
    };

    let result = match outcome {
        Ok(finished) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&finished)?);
            } else {
                print_summary(&finished);
            }
            match finished.status() {
                WorkflowStatus::Completed => Ok(()),
                status => Err(anyhow::anyhow!("workflow {} ended {}", workflow_id, status)),
            }
        }
        Err(e) => Err(e.into()),
    };

    orchestrator.shutdown().await;
    for agent in &agents {
        if let Err(e) = agent.terminate().await {
            warn!("Agent {} did not terminate cleanly: {}", agent.id(), e);
        }
    }
    broker.flush().await;
    if let Err(e) = store.close().await {
        warn!("State store close failed: {}", e);
    }
    result
}
