//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// The default interval between heartbeat rounds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 10;
/// The default number of missed heartbeat rounds after which a node is considered inactive.
pub const DEFAULT_NO_HEARTBEAT_TIMES: u64 = 3;
/// The default minimum available space a node must report to receive writes: one data partition.
pub const DEFAULT_MIN_WRITABLE_BYTES: u64 = 1024 * 1024 * 1024;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port of the HTTP API, which also serves Prometheus metrics.
    pub http_port: u16,
    /// The address which storage nodes use to report back to this master.
    pub master_addr: String,
    /// The name of the cluster this master manages.
    pub cluster_name: String,

    /// The interval in seconds between rounds of liveness checks and heartbeat tasks.
    #[serde(default = "Config::default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    /// The number of seconds without a report after which a node is marked inactive.
    #[serde(default = "Config::default_node_timeout_seconds")]
    pub node_timeout_seconds: u64,
    /// The minimum available space in bytes a node must report to be write-eligible.
    #[serde(default = "Config::default_min_writable_bytes")]
    pub min_writable_bytes: u64,
    /// An optional seed for the RNG used to initialize node carry values.
    #[serde(default)]
    pub carry_seed: Option<u64>,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants which the deserializer can not express.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.heartbeat_interval_seconds > 0, "HEARTBEAT_INTERVAL_SECONDS must be greater than 0");
        anyhow::ensure!(
            self.node_timeout_seconds >= self.heartbeat_interval_seconds,
            "NODE_TIMEOUT_SECONDS ({}) must not be shorter than HEARTBEAT_INTERVAL_SECONDS ({})",
            self.node_timeout_seconds,
            self.heartbeat_interval_seconds
        );
        Ok(())
    }

    /// The interval between heartbeat rounds.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// The duration without a report after which a node is inactive.
    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_seconds)
    }

    fn default_heartbeat_interval_seconds() -> u64 {
        DEFAULT_HEARTBEAT_INTERVAL_SECONDS
    }

    fn default_node_timeout_seconds() -> u64 {
        DEFAULT_HEARTBEAT_INTERVAL_SECONDS * DEFAULT_NO_HEARTBEAT_TIMES
    }

    fn default_min_writable_bytes() -> u64 {
        DEFAULT_MIN_WRITABLE_BYTES
    }

    /// Build a config for use in tests.
    #[cfg(test)]
    pub fn new_test() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            rust_log: "error".into(),
            http_port: 17010,
            master_addr: "127.0.0.1:17010".into(),
            cluster_name: "tidepool-test".into(),
            heartbeat_interval_seconds: 1,
            node_timeout_seconds: 3,
            min_writable_bytes: DEFAULT_MIN_WRITABLE_BYTES,
            carry_seed: Some(7),
        })
    }
}
