use super::*;
use serial_test::serial;

#[test]
#[serial]
fn from_env_falls_back_to_defaults_when_unset() {
    std::env::remove_var("TASKGW_MAX_QUEUE_DEPTH");
    let settings = DispatchSettings::from_env();
    assert_eq!(settings.max_queue_depth, 500);
}

#[test]
#[serial]
fn from_env_reads_a_malformed_value_as_the_default_instead_of_panicking() {
    std::env::set_var("TASKGW_MAX_QUEUE_DEPTH", "not-a-number");
    let settings = DispatchSettings::from_env();
    assert_eq!(settings.max_queue_depth, 500);
    std::env::remove_var("TASKGW_MAX_QUEUE_DEPTH");
}

#[test]
#[serial]
fn from_env_parses_a_memory_string_override() {
    std::env::set_var("TASKGW_DISPATCH_DEFAULT_MEMORY", "2g");
    let settings = DispatchSettings::from_env();
    assert_eq!(settings.default_memory_bytes, 2 * 1024 * 1024 * 1024);
    std::env::remove_var("TASKGW_DISPATCH_DEFAULT_MEMORY");
}

#[test]
fn default_settings_match_documented_values() {
    let settings = DispatchSettings::default();
    assert_eq!(settings.max_queue_depth, 500);
    assert_eq!(settings.max_global_concurrent, 50);
    assert_eq!(settings.proxy_route_ttl, Duration::from_secs(7200));
    assert_eq!(settings.reconnect_backoff_min, Duration::from_secs(1));
    assert_eq!(settings.reconnect_backoff_max, Duration::from_secs(30));
    assert_eq!(settings.default_memory_bytes, 4 * 1024 * 1024 * 1024);
}

#[test]
fn env_memory_bytes_falls_back_to_default_on_malformed_input() {
    assert_eq!(env_memory_bytes("TASKGW_DAEMON_TESTS_UNSET_VAR", "4g"), 4 * 1024 * 1024 * 1024);
}
