//! Integration tests for conductor-config

use conductor_config::*;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

/// Run `f` while holding the env lock with every override this suite sets cleared
fn with_clean_env<R>(f: impl FnOnce() -> R) -> R {
    let unset: Vec<(&str, Option<&str>)> = vec![
        ("CONDUCTOR_CEILING_RATE", None),
        ("CONDUCTOR_FCL_MS", None),
        ("CONDUCTOR_LOG_LEVEL", None),
        ("CONDUCTOR_COOL_DOWN_MS", None),
        ("CONDUCTOR_DISTRIBUTION", None),
        ("CONDUCTOR_INITIAL_RATE", None),
    ];
    with_vars(unset, f)
}

#[test]
fn test_default_config_validation() {
    let config = ConductorConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("CONDUCTOR_CEILING_RATE", Some("800")),
        ("CONDUCTOR_FCL_MS", Some("250")),
        ("CONDUCTOR_LOG_LEVEL", Some("debug")),
        ("CONDUCTOR_COOL_DOWN_MS", Some("1500")),
        ("CONDUCTOR_DISTRIBUTION", Some("exclusive-balanced")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.test.ceiling_rate, 800);
        assert_eq!(config.test.fcl_ms, 250);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.execution.cool_down_period, Duration::from_millis(1500));
        assert_eq!(
            config.execution.distribution,
            DistributionKind::ExclusiveBalanced
        );
    });
}

#[test]
fn test_invalid_env_value_is_reported() {
    with_vars(vec![("CONDUCTOR_INITIAL_RATE", Some("fast"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
        assert!(err.to_string().contains("CONDUCTOR_INITIAL_RATE"));
    });
}

#[test]
fn test_custom_prefix() {
    with_vars(vec![("LOADTEST_TOPIC_ROOT", Some("/mpt"))], || {
        let config = ConfigLoader::with_prefix("LOADTEST").from_env().unwrap();
        assert_eq!(config.exchange.topic_root, "/mpt");
    });
}

#[test]
fn test_yaml_config_file() {
    let yaml = r#"
exchange:
  url: "memory://lab"
  topic_root: "/mpt"
  collect_wait: 20ms
  collect_retries: 5
  reconnect:
    max_attempts: 3
    initial_delay: 50ms
    max_delay: 1s
    backoff:
      type: linear
    jitter: false

test:
  broker_url: "amqp://sut:5672/test.queue"
  initial_rate: 100
  ceiling_rate: 200
  rate_increment: 50
  initial_parallel: 1
  ceiling_parallel: 2
  parallel_increment: 1
  message_size: 100
  duration: 5s
  fcl_ms: 600

execution:
  cool_down_period: 2s
  inflight_delay: 100ms
  distribution: legacy

logging:
  level: warn
  format: json

lab:
  workers: 4
  breaking_point: 300
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = with_clean_env(|| ConfigLoader::new().from_file(file.path()).unwrap());

    assert_eq!(config.exchange.topic_root, "/mpt");
    assert_eq!(config.exchange.collect_wait, Duration::from_millis(20));
    assert_eq!(config.exchange.reconnect.backoff, BackoffKind::Linear);
    assert_eq!(config.test.duration, Duration::from_secs(5));
    assert_eq!(config.test.message_size, 100);
    assert_eq!(config.execution.cool_down_period, Duration::from_secs(2));
    assert_eq!(config.execution.distribution, DistributionKind::Legacy);
    assert_eq!(config.execution.poll_interval, Duration::from_secs(1));
    assert_eq!(config.logging.format, LogFormat::Json);

    let lab = config.lab.unwrap();
    assert_eq!(lab.workers, 4);
    assert_eq!(lab.breaking_point, 300);
    assert_eq!(lab.inspectors, 0);
}

#[test]
fn test_invalid_file_is_rejected() {
    let yaml = "test:\n  initial_rate: 900\n  ceiling_rate: 100\n";
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let err = with_clean_env(|| ConfigLoader::new().from_file(file.path()).unwrap_err());
    assert!(matches!(err, ConfigError::Domain { ref domain, .. } if domain == "test"));
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .load(Some("/definitely/not/here.yaml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
