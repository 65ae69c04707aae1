use super::*;

fn request(run_id: &str) -> DispatchJobRequest {
    DispatchJobRequest {
        run_id: run_id.to_string(),
        branch: "agent/repo/task/run-1".to_string(),
        env: HashMap::new(),
        secrets: HashMap::new(),
        cpu_nanos: 1_000_000_000,
        memory_bytes: 512 * 1024 * 1024,
        timeout: Duration::from_secs(600),
        attempt: 1,
        labels: HashMap::new(),
    }
}

#[tokio::test]
async fn dispatch_defaults_to_success_when_unconfigured() {
    let rpc = FakeWorkerRpc::new();
    let response = rpc.dispatch_job("http://rt-1:5201", request("run-1")).await.unwrap();
    assert!(response.success);
}

#[tokio::test]
async fn dispatch_returns_configured_rejection() {
    let rpc = FakeWorkerRpc::new();
    rpc.set_dispatch_response("http://rt-1:5201", DispatchJobResponse::rejected("no capacity"));
    let response = rpc.dispatch_job("http://rt-1:5201", request("run-1")).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.error_message.as_deref(), Some("no capacity"));
}

#[tokio::test]
async fn unreachable_endpoint_fails_every_call() {
    let rpc = FakeWorkerRpc::new();
    rpc.set_reachable("http://rt-1:5201", false);
    assert!(rpc.dispatch_job("http://rt-1:5201", request("run-1")).await.is_err());
    assert!(rpc.heartbeat("http://rt-1:5201", "rt-1").await.is_err());
    assert!(rpc.cancel_job("http://rt-1:5201", "run-1").await.is_err());
}

#[tokio::test]
async fn subscribe_replays_queued_messages() {
    let rpc = FakeWorkerRpc::new();
    rpc.queue_message(
        "http://rt-1:5201",
        HubMessage::Job(JobEvent {
            run_id: "run-1".to_string(),
            event_type: "log_chunk".to_string(),
            summary: Some("hello".to_string()),
            error: None,
            timestamp_ms: 0,
            metadata: HashMap::new(),
        }),
    );
    let mut rx = rpc.subscribe("http://rt-1:5201").await.unwrap();
    let msg = rx.recv().await.unwrap();
    assert!(matches!(msg, HubMessage::Job(_)));
}
