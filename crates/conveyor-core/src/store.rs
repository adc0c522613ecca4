//! Storage abstractions consumed by the scheduler and execution manager.
//!
//! Implementations must treat `version` as an optimistic concurrency token:
//! `update` succeeds only when the stored version equals the version of the
//! record passed in, and returns the record with the version bumped.
//! Otherwise it fails with [`Error::VersionConflict`](crate::Error).

use async_trait::async_trait;

use crate::execution::{ConfigFile, Execution, Pipeline};
use crate::repository::Repository;
use crate::secret::Secret;
use crate::stage::{Stage, Step};
use crate::{ExecutionId, PipelineId, RepoId, Result, SpaceId, StageId, StepId};

#[async_trait]
pub trait StageStore: Send + Sync {
    /// Find a stage by id (without steps).
    async fn find(&self, id: StageId) -> Result<Stage>;

    /// Write a stage if its version is current.
    async fn update(&self, stage: &Stage) -> Result<Stage>;

    /// List the stages of an execution in number order, with steps attached.
    async fn list(&self, execution_id: ExecutionId) -> Result<Vec<Stage>>;

    /// List every pending or running stage, oldest first.
    async fn list_incomplete(&self) -> Result<Vec<Stage>>;
}

#[async_trait]
pub trait StepStore: Send + Sync {
    async fn find(&self, id: StepId) -> Result<Step>;

    /// Persist a new step. A zero id is replaced with a store-assigned one.
    async fn create(&self, step: &Step) -> Result<Step>;

    /// Write a step if its version is current.
    async fn update(&self, step: &Step) -> Result<Step>;

    async fn list(&self, stage_id: StageId) -> Result<Vec<Step>>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn find(&self, id: ExecutionId) -> Result<Execution>;

    /// Write an execution if its version is current.
    async fn update(&self, execution: &Execution) -> Result<Execution>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn find(&self, id: PipelineId) -> Result<Pipeline>;
}

#[async_trait]
pub trait RepoStore: Send + Sync {
    async fn find(&self, id: RepoId) -> Result<Repository>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// List every secret defined in a space.
    async fn list_all(&self, space_id: SpaceId) -> Result<Vec<Secret>>;
}

/// Resolves file contents from a repository at a given commit or ref.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn get(&self, repo: &Repository, path: &str, git_ref: &str) -> Result<ConfigFile>;
}
