//! Configuration for EpochKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Main configuration for an EpochKV server instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the persisted log files
    /// Internal structure:
    ///   {log_dir}/
    ///     ├── <epoch>-base     (full snapshot of the map)
    ///     └── <epoch>-delta    (ordered write records since last flush)
    pub log_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Pipeline Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the queue feeding the write sequencer
    pub write_queue_capacity: usize,

    /// Capacity of the queue feeding the persistence manager
    pub persist_queue_capacity: usize,

    /// How often drained writes are flushed to a delta file
    pub delta_interval: Duration,

    /// How often a full base snapshot is taken
    pub base_interval: Duration,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./epochkv_logs"),
            write_queue_capacity: 64,
            persist_queue_capacity: 1024,
            delta_interval: Duration::from_secs(1),
            base_interval: Duration::from_secs(60),
            listen_addr: "127.0.0.1:12345".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(KvError::Config("listen address is empty".to_string()));
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(KvError::Config("log directory is empty".to_string()));
        }
        if self.write_queue_capacity == 0 || self.persist_queue_capacity == 0 {
            return Err(KvError::Config(
                "queue capacities must be greater than zero".to_string(),
            ));
        }
        if self.delta_interval.is_zero() || self.base_interval.is_zero() {
            return Err(KvError::Config(
                "flush intervals must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(KvError::Config(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the log directory (root for all persisted files)
    pub fn log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_dir = path.into();
        self
    }

    /// Set the write queue capacity
    pub fn write_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.write_queue_capacity = capacity;
        self
    }

    /// Set the persistence queue capacity
    pub fn persist_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.persist_queue_capacity = capacity;
        self
    }

    /// Set the delta flush interval
    pub fn delta_interval(mut self, interval: Duration) -> Self {
        self.config.delta_interval = interval;
        self
    }

    /// Set the base snapshot interval
    pub fn base_interval(mut self, interval: Duration) -> Self {
        self.config.base_interval = interval;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Listen on localhost at the given port
    pub fn port(mut self, port: u16) -> Self {
        self.config.listen_addr = format!("127.0.0.1:{}", port);
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Client-side configuration
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// How long a caller waits for its response. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            request_timeout: Some(timeout),
        }
    }
}
