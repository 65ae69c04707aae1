use super::*;
use crate::ids::{ProjectId, RepositoryId, RunId, TaskId};

fn run() -> Run {
    Run {
        run_id: RunId::new("run-1"),
        task_id: TaskId::new("task-1"),
        project_id: ProjectId::new("proj-1"),
        repository_id: RepositoryId::new("repo-1"),
        state: RunState::Queued,
        attempt: 0,
        max_attempts: 3,
        bound_runtime_container_id: None,
        result: None,
        failure_class: None,
        output_json: None,
        pr_url: None,
        image_ref: None,
        image_digest: None,
        image_source: None,
    }
}

#[test]
fn terminal_states_report_terminal() {
    for state in [RunState::Succeeded, RunState::Failed, RunState::Cancelled, RunState::TimedOut] {
        assert!(state.is_terminal(), "{state:?} should be terminal");
    }
}

#[test]
fn non_terminal_states_report_not_terminal() {
    for state in [RunState::Queued, RunState::Dispatching, RunState::PendingApproval, RunState::Running] {
        assert!(!state.is_terminal(), "{state:?} should not be terminal");
    }
}

#[test]
fn retries_remaining_while_under_max_attempts() {
    let mut r = run();
    r.attempt = 2;
    assert!(r.has_retries_remaining());
    r.attempt = 3;
    assert!(!r.has_retries_remaining());
}
