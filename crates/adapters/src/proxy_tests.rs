use super::*;

#[test]
fn register_then_remove_round_trips() {
    let registry = InMemoryProxyRouteRegistry::new();
    let now = Instant::now();
    registry.register("/proxy/runs/run-1/{**}", "http://runtime-1:5201", Duration::from_secs(7200), now);
    assert_eq!(registry.target_of("/proxy/runs/run-1/{**}").as_deref(), Some("http://runtime-1:5201"));

    registry.remove("/proxy/runs/run-1/{**}");
    assert!(!registry.is_registered("/proxy/runs/run-1/{**}"));
}

#[test]
fn re_registering_replaces_the_target() {
    let registry = InMemoryProxyRouteRegistry::new();
    let now = Instant::now();
    registry.register("/proxy/runs/run-1/{**}", "http://runtime-1:5201", Duration::from_secs(7200), now);
    registry.register("/proxy/runs/run-1/{**}", "http://runtime-2:5201", Duration::from_secs(7200), now);
    assert_eq!(registry.target_of("/proxy/runs/run-1/{**}").as_deref(), Some("http://runtime-2:5201"));
}
