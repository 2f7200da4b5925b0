use super::settings::{QueueSettings, Settings};
use super::{load_config, load_config_from};
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.queue.default_ttl, 1800);
    assert_eq!(settings.queue.max_ttl, 1800);
    assert_eq!(settings.queue.timeout_ms, 5000);
    assert_eq!(settings.queue.error_ratio_ms, 1000);
    assert_eq!(settings.queue.flush_interval_ms, 5000);
    assert_eq!(settings.queue.flush_limit, 20);
    assert_eq!(settings.storage.path, "relayq_db");
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_effective_ttl_clamps_and_falls_back() {
    let queue = QueueSettings::default();
    assert_eq!(queue.effective_ttl(Some(5000)), 1800);
    assert_eq!(queue.effective_ttl(Some(3)), 3);
    assert_eq!(queue.effective_ttl(Some(0)), 1800);
    assert_eq!(queue.effective_ttl(Some(-4)), 1800);
    assert_eq!(queue.effective_ttl(None), 1800);
}

#[test]
fn test_validate_rejects_non_positive_values() {
    let queue = QueueSettings {
        flush_limit: 0,
        ..QueueSettings::default()
    };
    assert_eq!(
        queue.validate().unwrap_err(),
        "queue.flush_limit must be positive"
    );
    assert!(QueueSettings::default().validate().is_ok());
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("relayq.toml");
    fs::write(
        &path,
        r#"
            [server]
            port = 9000

            [queue]
            max_ttl = 60
            flush_limit = 5

            [storage]
            path = "/var/lib/relayq"
        "#,
    )
    .expect("write config file");

    let cfg = load_config_from(&path).expect("load_config_from failed");
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.queue.max_ttl, 60);
    assert_eq!(cfg.queue.flush_limit, 5);
    assert_eq!(cfg.queue.default_ttl, 1800);
    assert_eq!(cfg.storage.path, "/var/lib/relayq");
}

#[test]
#[serial]
fn test_environment_overrides_defaults() {
    temp_env::with_vars(
        [
            ("RELAYQ__QUEUE__MAX_TTL", Some("600")),
            ("RELAYQ__QUEUE__TIMEOUT_MS", Some("250")),
            ("RELAYQ__LOG__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.queue.max_ttl, 600);
            assert_eq!(cfg.queue.timeout_ms, 250);
            assert_eq!(cfg.log.level, "debug");
            assert_eq!(cfg.server.port, 8080);
        },
    );
}

#[test]
#[serial]
fn test_invalid_values_are_rejected_at_load() {
    temp_env::with_var("RELAYQ__QUEUE__ERROR_RATIO_MS", Some("0"), || {
        let err = load_config().unwrap_err();
        assert!(err.to_string().contains("queue.error_ratio_ms"));
    });
}
