// ==========================
// tests/unit/config_tests.rs
// ==========================
//! Layered configuration: defaults, file, environment.
use ridelink_realtime::config::{Settings, ENV_PREFIX};
use ridelink_realtime::error::AppError;
use ridelink_realtime::AppState;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_missing_file_falls_back_to_defaults_and_env() {
    let temp_dir = tempdir().unwrap();
    let missing = temp_dir.path().join("absent.toml");

    // Other tests in this binary never assert on the port or the secret.
    std::env::set_var(format!("{ENV_PREFIX}AUTH__JWT_SECRET"), "from-env");
    std::env::set_var(format!("{ENV_PREFIX}SERVER__PORT"), "9443");
    let loaded = Settings::load_from(&missing);
    std::env::remove_var(format!("{ENV_PREFIX}AUTH__JWT_SECRET"));
    std::env::remove_var(format!("{ENV_PREFIX}SERVER__PORT"));

    let settings = loaded.unwrap();
    assert_eq!(settings.auth.jwt_secret, "from-env");
    assert_eq!(settings.server.port, 9443);
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.location.stale_sweep_secs, 10);
}

#[test]
fn test_file_overrides_defaults() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("ridelink.toml");
    fs::write(
        &path,
        r#"
[heartbeat]
interval_secs = 15

[location]
auto_subscribe = false

[auth]
jwt_secret = "file-secret"
leeway_secs = 5

[log]
level = "debug"
json = true
"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.heartbeat.interval_secs, 15);
    assert!(!settings.location.auto_subscribe);
    assert_eq!(settings.auth.leeway_secs, 5);
    assert_eq!(settings.log.level, "debug");
    assert!(settings.log.json);
}

#[test]
fn test_stale_threshold_shorter_than_sweep_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("ridelink.toml");
    fs::write(
        &path,
        "[location]\nstale_sweep_secs = 20\nstale_after_secs = 10\n[auth]\njwt_secret = \"s\"\n",
    )
    .unwrap();

    match Settings::load_from(&path) {
        Err(AppError::Config(msg)) => assert!(msg.contains("stale_after_secs")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_app_state_requires_valid_settings() {
    assert!(matches!(
        AppState::from_settings(Settings::default()),
        Err(AppError::Config(_))
    ));

    let mut settings = Settings::default();
    settings.auth.jwt_secret = "secret".to_string();
    let state = AppState::from_settings(settings).unwrap();
    assert_eq!(state.locations.peer_count(), 0);
    assert_eq!(state.notifications.connection_count(), 0);
}
