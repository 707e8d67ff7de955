use super::*;
use agentweave_protocols::{WorkflowStep, WorkflowStepResult};

fn diamond() -> WorkflowConfig {
    WorkflowConfig::new("diamond")
        .with_id("wf")
        .with_step(WorkflowStep::new("a", "agent", "work"))
        .with_step(WorkflowStep::new("b", "agent", "work").depends_on(["a"]))
        .with_step(WorkflowStep::new("c", "agent", "work").depends_on(["a"]))
        .with_step(WorkflowStep::new("d", "agent", "work").depends_on(["b", "c"]))
}

fn complete(workflow: &mut Workflow, step: &str) {
    workflow.metadata.step_results.insert(
        step.to_string(),
        WorkflowStepResult::new(step, StepStatus::Completed),
    );
}

#[test]
fn test_validate_accepts_diamond() {
    assert!(validate(&diamond()).is_ok());
}

#[test]
fn test_validate_rejects_empty_workflow() {
    let err = validate(&WorkflowConfig::new("empty")).unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[test]
fn test_validate_rejects_unknown_dependency() {
    let config = WorkflowConfig::new("wf")
        .with_step(WorkflowStep::new("a", "agent", "work").depends_on(["ghost"]));
    let err = validate(&config).unwrap_err();
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn test_validate_rejects_duplicates_and_separator() {
    let dup = WorkflowConfig::new("wf")
        .with_step(WorkflowStep::new("a", "agent", "work"))
        .with_step(WorkflowStep::new("a", "agent", "work"));
    assert!(validate(&dup).unwrap_err().to_string().contains("duplicate"));

    let bad = WorkflowConfig::new("wf").with_step(WorkflowStep::new("a:b", "agent", "work"));
    assert!(matches!(validate(&bad), Err(WorkflowError::Validation(_))));
}

#[test]
fn test_validate_detects_cycle() {
    let config = WorkflowConfig::new("wf")
        .with_step(WorkflowStep::new("start", "agent", "work"))
        .with_step(WorkflowStep::new("x", "agent", "work").depends_on(["start", "z"]))
        .with_step(WorkflowStep::new("y", "agent", "work").depends_on(["x"]))
        .with_step(WorkflowStep::new("z", "agent", "work").depends_on(["y"]));
    match validate(&config) {
        Err(WorkflowError::Cycle(steps)) => assert_eq!(steps, vec!["x", "y", "z"]),
        other => panic!("expected cycle, got {other:?}"),
    }

    let selfish = WorkflowConfig::new("wf")
        .with_step(WorkflowStep::new("me", "agent", "work").depends_on(["me"]));
    assert!(matches!(validate(&selfish), Err(WorkflowError::Cycle(_))));
}

#[test]
fn test_topological_order_respects_dependencies() {
    let order = topological_order(&diamond()).unwrap();
    assert_eq!(order, vec!["a", "b", "c", "d"]);
}

#[test]
fn test_ready_set_expands_frontier() {
    let mut workflow = Workflow::new(diamond());
    assert_eq!(ready_steps(&workflow), vec!["a"]);

    workflow.metadata.pending_steps.insert("a".to_string());
    assert!(ready_steps(&workflow).is_empty());

    workflow.metadata.pending_steps.clear();
    complete(&mut workflow, "a");
    assert_eq!(ready_steps(&workflow), vec!["b", "c"]);

    complete(&mut workflow, "b");
    assert_eq!(ready_steps(&workflow), vec!["c"]);

    complete(&mut workflow, "c");
    assert_eq!(ready_steps(&workflow), vec!["d"]);
}

#[test]
fn test_failed_dependency_strands_dependents() {
    let mut workflow = Workflow::new(diamond());
    complete(&mut workflow, "a");
    workflow.metadata.step_results.insert(
        "b".to_string(),
        WorkflowStepResult::new("b", StepStatus::Failed),
    );
    complete(&mut workflow, "c");

    assert!(ready_steps(&workflow).is_empty());
    assert_eq!(unsettled_steps(&workflow), vec!["d"]);
}

#[test]
fn test_retrying_step_is_not_ready() {
    let mut workflow = Workflow::new(diamond());
    workflow.metadata.step_results.insert(
        "a".to_string(),
        WorkflowStepResult::new("a", StepStatus::Retrying),
    );
    workflow.metadata.pending_steps.insert("a".to_string());
    assert!(ready_steps(&workflow).is_empty());
    assert!(unsettled_steps(&workflow).is_empty());
}
