// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Daemon configuration.
//!
//! The orchestrator consumes this plain option struct; it can be built in
//! code or loaded from a YAML file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::forwarder::ForwardDestination;

const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8125;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;
const DEFAULT_GRAPHITE_PORT: u16 = 2003;
const DEFAULT_SOCKET_LIFETIME_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the statsd UDP listener binds to.
    pub bind: String,
    /// Port the statsd UDP listener binds to.
    pub port: u16,
    /// Seconds between aggregation-table drains shipped to Graphite.
    pub flush_interval: u64,
    pub graphite_host: String,
    pub graphite_port: u16,
    /// Whether raw datagrams are relayed to downstream statsd peers.
    pub forwarding: bool,
    pub forwarding_destinations: Vec<ForwardDestination>,
    /// Seconds between forwarder socket-pool rebuilds.
    pub forwarding_socket_lifetime: u64,
    /// TCP port for the HTTP health endpoint; disabled when unset.
    pub health_port: Option<u16>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            flush_interval: DEFAULT_FLUSH_INTERVAL_SECS,
            graphite_host: DEFAULT_BIND.to_string(),
            graphite_port: DEFAULT_GRAPHITE_PORT,
            forwarding: false,
            forwarding_destinations: Vec::new(),
            forwarding_socket_lifetime: DEFAULT_SOCKET_LIFETIME_SECS,
            health_port: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file; unset fields take defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
