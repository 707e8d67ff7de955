use super::*;
use agentweave_protocols::TaskConfig;

fn task(id: &str) -> Task {
    Task::new(TaskConfig::new(id, "test"))
}

#[test]
fn test_add_and_get() {
    let mut manager = TaskManager::new();
    manager.add_task(task("t1")).unwrap();
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.get_task("t1").unwrap().id(), "t1");
    assert!(manager.get_task("t2").is_none());
}

#[test]
fn test_add_duplicate_fails() {
    let mut manager = TaskManager::new();
    manager.add_task(task("t1")).unwrap();
    assert!(matches!(
        manager.add_task(task("t1")),
        Err(TaskError::AlreadyExists(_))
    ));
    assert_eq!(manager.len(), 1);
}

#[test]
fn test_remove_task() {
    let mut manager = TaskManager::new();
    manager.add_task(task("t1")).unwrap();
    manager.add_task(task("t2")).unwrap();
    assert_eq!(manager.remove_task("t1").unwrap().id(), "t1");
    assert!(manager.remove_task("t1").is_none());
    assert_eq!(manager.get_current_tasks(), vec!["t2"]);
}

#[test]
fn test_get_all_tasks_is_a_copy() {
    let mut manager = TaskManager::new();
    manager.add_task(task("t1")).unwrap();
    let mut copies = manager.get_all_tasks();
    copies[0].set_progress(0.9);
    assert_eq!(manager.get_task("t1").unwrap().metadata.progress, 0.0);
}

#[test]
fn test_current_tasks_in_insertion_order_excluding_terminal() {
    let mut manager = TaskManager::new();
    for id in ["c", "a", "b"] {
        manager.add_task(task(id)).unwrap();
    }
    manager.update_task_status("a", TaskStatus::InProgress).unwrap();
    manager
        .set_task_result("a", TaskResult::success(serde_json::json!(1)))
        .unwrap();
    assert_eq!(manager.get_current_tasks(), vec!["c", "b"]);
    assert_eq!(manager.get_all_tasks().len(), 3);
}

#[test]
fn test_update_status_validates_transition() {
    let mut manager = TaskManager::new();
    manager.add_task(task("t1")).unwrap();
    manager.update_task_status("t1", TaskStatus::Cancelled).unwrap();
    assert!(matches!(
        manager.update_task_status("t1", TaskStatus::InProgress),
        Err(TaskError::InvalidTransition { .. })
    ));
    assert!(matches!(
        manager.update_task_status("missing", TaskStatus::InProgress),
        Err(TaskError::NotFound(_))
    ));
}

#[test]
fn test_set_result_and_progress() {
    let mut manager = TaskManager::new();
    manager.add_task(task("t1")).unwrap();
    manager.set_task_progress("t1", 0.5).unwrap();
    assert_eq!(manager.get_task("t1").unwrap().metadata.progress, 0.5);

    manager
        .set_task_result("t1", TaskResult::failure("nope"))
        .unwrap();
    let stored = manager.get_task("t1").unwrap();
    assert_eq!(stored.status(), TaskStatus::Failed);
    assert_eq!(stored.result.as_ref().unwrap().error.as_deref(), Some("nope"));
}
