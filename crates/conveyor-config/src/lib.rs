//! KDL configuration parsing for Conveyor.
//!
//! The system configuration covers:
//! - Server HTTP network settings (used to build clone URLs for agents)
//! - Scheduler dispatch interval and distributed lock key
//! - Database connection for the distributed lock backend

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, HttpConfig, SchedulerConfig, ServerConfig, SystemConfig, load_system_config,
    parse_system_config,
};
