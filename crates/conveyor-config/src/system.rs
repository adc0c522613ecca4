//! System configuration parsing.
//!
//! ```kdl
//! server {
//!     http network="conveyor" bind=":3000"
//! }
//! scheduler {
//!     interval-secs 60
//!     lock-key "build_queue"
//! }
//! database url="postgres://conveyor@localhost/conveyor" max-connections=4
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default interval between fallback dispatch passes.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(60);

/// Default name of the distributed lock guarding dispatch passes.
pub const DEFAULT_LOCK_KEY: &str = "build_queue";

/// System-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    /// Database backing the distributed lock. Without it, locking is local
    /// to the process.
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub http: HttpConfig,
}

/// How build containers reach the server over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Host name of the server on the build network.
    pub network: String,
    /// Listen address, e.g. ":3000".
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            network: "localhost".to_string(),
            bind: ":3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between fallback dispatch passes.
    pub interval: Duration,
    /// Name of the distributed lock held during a dispatch pass.
    pub lock_key: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_DISPATCH_INTERVAL,
            lock_key: DEFAULT_LOCK_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Read and parse a system configuration file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_system_config(&text)
}

/// Parse system configuration from KDL text. Omitted sections keep their
/// defaults.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = SystemConfig::default();
    let mut seen_scheduler = false;

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        if child.name().value() == "http" {
                            config.server.http = parse_http(child);
                        }
                    }
                }
            }
            "scheduler" => {
                if seen_scheduler {
                    return Err(ConfigError::Duplicate("scheduler".to_string()));
                }
                seen_scheduler = true;
                config.scheduler = parse_scheduler(node)?;
            }
            "database" => {
                config.database = Some(parse_database(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_http(node: &KdlNode) -> HttpConfig {
    let defaults = HttpConfig::default();
    HttpConfig {
        network: get_string_prop(node, "network").unwrap_or(defaults.network),
        bind: get_string_prop(node, "bind").unwrap_or(defaults.bind),
    }
}

fn parse_scheduler(node: &KdlNode) -> ConfigResult<SchedulerConfig> {
    let mut scheduler = SchedulerConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "interval-secs" => {
                    let secs = get_first_integer_arg(child, "scheduler interval-secs")?;
                    if secs == 0 {
                        return Err(ConfigError::InvalidValue {
                            field: "scheduler interval-secs".to_string(),
                            message: "must be greater than zero".to_string(),
                        });
                    }
                    scheduler.interval = Duration::from_secs(secs);
                }
                "lock-key" => {
                    scheduler.lock_key = get_first_string_arg(child)
                        .filter(|key| !key.is_empty())
                        .ok_or_else(|| {
                            ConfigError::MissingField("scheduler lock-key".to_string())
                        })?;
                }
                _ => {}
            }
        }
    }

    Ok(scheduler)
}

fn parse_database(node: &KdlNode) -> ConfigResult<DatabaseConfig> {
    let url = get_string_prop(node, "url")
        .ok_or_else(|| ConfigError::MissingField("database url".to_string()))?;

    let max_connections = match node.get("max-connections") {
        Some(value) => {
            let n = value.as_integer().ok_or_else(|| ConfigError::InvalidValue {
                field: "database max-connections".to_string(),
                message: "expected an integer".to_string(),
            })?;
            u32::try_from(n).map_err(|_| ConfigError::InvalidValue {
                field: "database max-connections".to_string(),
                message: format!("out of range: {}", n),
            })?
        }
        None => 4,
    };

    Ok(DatabaseConfig {
        url,
        max_connections,
    })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?
        .value();

    value
        .as_integer()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a non-negative integer, got {:?}", value),
        })
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}
