//! Simple configuration demo
//!
//! Writes a config file, loads it, and prints the effective settings next to
//! the generated sample.

use std::fs;
use tempfile::TempDir;
use tether_config::{ConfigError, ConfigLoader, ConfigResult, TetherConfig};

fn main() -> ConfigResult<()> {
    println!("Simple Tether configuration demo");

    let temp_dir = TempDir::new().map_err(ConfigError::FileReadError)?;

    let config_path = temp_dir.path().join("tether.yaml");
    let config_content = r#"
supervisor:
  executable: "/opt/tether/bin/runtime"
  identity: "node-1-shm"
  restart_backoff: 8s

registry:
  timeout_ticks: 30
  retry_every: 10
  tick_interval: "1s"

logging:
  level: "info"
  format: "json"
"#;

    fs::write(&config_path, config_content).map_err(ConfigError::FileReadError)?;

    let config = ConfigLoader::new().from_file(&config_path)?;

    println!("Configuration loaded:");
    println!(
        "   Runtime: {:?} {}",
        config.supervisor.executable, config.supervisor.identity
    );
    println!(
        "   Restart backoff: {:?}",
        config.supervisor.restart_backoff
    );
    println!(
        "   Retry every {} ticks, timeout after {} ticks of {:?}",
        config.registry.retry_every, config.registry.timeout_ticks, config.registry.tick_interval
    );
    println!("   Logging level: {}", config.logging.level);

    println!("\nDefault configuration:\n{}", TetherConfig::generate_sample());
    Ok(())
}
