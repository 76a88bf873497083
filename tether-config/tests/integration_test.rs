//! Integration tests for tether-config

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use temp_env::with_vars;
use tether_config::domains::logging::{LogFormat, LogLevel};
use tether_config::*;

#[test]
fn test_default_config_validation() {
    let config = TetherConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("TETHER_RUNTIME_EXECUTABLE", Some("/opt/runtime/bin/ranker")),
        ("TETHER_RUNTIME_IDENTITY", Some("node-7-shm")),
        ("TETHER_RESTART_BACKOFF_SECONDS", Some("12")),
        ("TETHER_TIMEOUT_TICKS", Some("60")),
        ("TETHER_RETRY_EVERY", Some("15")),
        ("TETHER_LOG_LEVEL", Some("debug")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.supervisor.executable, Some(PathBuf::from("/opt/runtime/bin/ranker")));
        assert_eq!(config.supervisor.identity, "node-7-shm");
        assert_eq!(config.supervisor.restart_backoff, Duration::from_secs(12));
        assert_eq!(config.registry.timeout_ticks, 60);
        assert_eq!(config.registry.retry_every, 15);
        assert_eq!(config.logging.level, LogLevel::Debug);
    });
}

#[test]
fn test_invalid_env_value_rejected() {
    with_vars(vec![("TETHER_TIMEOUT_TICKS", Some("soon"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    });
}

#[test]
fn test_env_override_is_validated() {
    // retry cadence longer than the countdown would never retry
    with_vars(vec![("TETHER_RETRY_EVERY", Some("45"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::DomainError { .. })));
    });
}

#[test]
fn test_yaml_config_serialization() {
    let config = TetherConfig::default();
    let yaml = serde_yaml::to_string(&config).unwrap();

    let parsed: TetherConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed.registry.tick_interval, Duration::from_secs(1));
}

#[test]
fn test_comprehensive_config_file() {
    let yaml = r#"
supervisor:
  executable: "/usr/local/bin/xvm-runtime"
  identity: "chain-main-shm"
  restart_backoff: 4s
  terminate_grace: 2s
  stdio_transport: false

registry:
  timeout_ticks: 20
  retry_every: 5
  tick_interval: 500ms

logging:
  level: warn
  format: json
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = with_vars(Vec::<(&str, Option<&str>)>::new(), || {
        ConfigLoader::new().load(Some(file.path())).unwrap()
    });

    assert_eq!(config.supervisor.executable, Some(PathBuf::from("/usr/local/bin/xvm-runtime")));
    assert_eq!(config.supervisor.identity, "chain-main-shm");
    assert_eq!(config.supervisor.restart_backoff, Duration::from_secs(4));
    assert_eq!(config.supervisor.terminate_grace, Duration::from_secs(2));
    assert!(!config.supervisor.stdio_transport);
    assert_eq!(config.registry.timeout_ticks, 20);
    assert_eq!(config.registry.retry_every, 5);
    assert_eq!(config.registry.tick_interval, Duration::from_millis(500));
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ConfigLoader::new().from_file("/nonexistent/tether.yaml");
    assert!(matches!(result, Err(ConfigError::FileReadError(_))));
}

#[test]
fn test_custom_prefix_loader() {
    let vars = vec![
        ("NODE_TIMEOUT_TICKS", Some("90")),
        ("NODE_LOG_FORMAT", Some("compact")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::with_prefix("NODE");
        let config = loader.from_env().unwrap();

        assert_eq!(config.registry.timeout_ticks, 90);
        assert_eq!(config.logging.format, LogFormat::Compact);
    });
}

#[test]
fn test_generate_sample_config() {
    let sample = TetherConfig::generate_sample();
    assert!(sample.contains("supervisor:"));
    assert!(sample.contains("registry:"));
    assert!(sample.contains("logging:"));

    let parsed: TetherConfig = serde_yaml::from_str(&sample).unwrap();
    assert!(parsed.validate_all().is_ok());
}
