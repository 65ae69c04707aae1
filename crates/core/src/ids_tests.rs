use super::*;

#[test]
fn runtime_id_sanitises_task_id() {
    let task = TaskId::new("Fix Bug #42 / retry");
    let id = RuntimeId::for_task("task-runtime", &task);
    assert_eq!(id.as_str(), "task-runtime-fix-bug--42---retry");
}

#[test]
fn runtime_id_truncates_to_max_len() {
    let task = TaskId::new("a".repeat(200));
    let id = RuntimeId::for_task("task-runtime", &task);
    assert_eq!(id.as_str().len(), RuntimeId::MAX_LEN);
}

#[test]
fn sanitise_lowercases_and_replaces_disallowed_bytes() {
    assert_eq!(sanitise("Hello World!"), "hello-world-");
    assert_eq!(sanitise("already-ok_1.2"), "already-ok_1.2");
}

#[test]
fn ids_compare_against_str() {
    let repo = RepositoryId::new("repo-1");
    assert_eq!(repo, "repo-1");
    assert_eq!(repo.as_str(), "repo-1");
}
