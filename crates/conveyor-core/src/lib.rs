//! Core domain types and traits for the Conveyor stage scheduler.
//!
//! This crate contains:
//! - Resource identifiers and the error taxonomy
//! - Stage, step and execution records
//! - Repository, pipeline and secret types
//! - Storage, log streaming and distributed lock contracts

pub mod error;
pub mod execution;
pub mod id;
pub mod lock;
pub mod log;
pub mod repository;
pub mod secret;
pub mod stage;
pub mod store;

pub use error::{Error, Result};
pub use id::{ExecutionId, PipelineId, RepoId, SecretId, SpaceId, StageId, StepId};
