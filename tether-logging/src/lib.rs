//! Logging initialisation for Tether
//!
//! Installs a `tracing-subscriber` formatter configured from the logging
//! domain of [`tether_config::TetherConfig`]. Records emitted through the
//! `log` facade by the lower crates are bridged into the same subscriber.

pub mod init;

pub use init::{build_env_filter, init_logging, init_simple_tracing, init_test_tracing};
