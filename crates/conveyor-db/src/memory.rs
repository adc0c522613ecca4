//! In-memory implementations of the storage contracts.
//!
//! Every record carries a `version`; updates are compare-and-swap on that
//! field exactly like a durable store would do it, so races between agents
//! and replicas behave the same way against this backend.

mod catalog;
mod executions;
mod logs;
mod stages;

pub use logs::MemoryLogStore;

use bytes::Bytes;
use chrono::Utc;
use conveyor_core::execution::{ConfigFile, Execution, Pipeline};
use conveyor_core::repository::Repository;
use conveyor_core::secret::Secret;
use conveyor_core::stage::{Stage, Step};
use conveyor_core::{ExecutionId, PipelineId, RepoId, SecretId, StageId, StepId};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    stages: BTreeMap<StageId, Stage>,
    steps: BTreeMap<StepId, Step>,
    executions: BTreeMap<ExecutionId, Execution>,
    pipelines: HashMap<PipelineId, Pipeline>,
    repos: HashMap<RepoId, Repository>,
    secrets: Vec<Secret>,
    /// Keyed by (repository, path, git ref).
    files: HashMap<(RepoId, String, String), ConfigFile>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A single in-memory store implementing every record contract.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stage, assigning an id when it has none. Steps carried by
    /// the stage are stored alongside it.
    pub async fn insert_stage(&self, mut stage: Stage) -> Stage {
        let mut state = self.state.write().await;
        if stage.id.get() == 0 {
            stage.id = StageId::new(state.next_id());
        }
        let now = Utc::now();
        stage.created = now;
        stage.updated = now;
        for mut step in std::mem::take(&mut stage.steps) {
            if step.id.get() == 0 {
                step.id = StepId::new(state.next_id());
            }
            step.stage_id = stage.id;
            state.steps.insert(step.id, step);
        }
        state.stages.insert(stage.id, stage.clone());
        stage
    }

    pub async fn insert_execution(&self, mut execution: Execution) -> Execution {
        let mut state = self.state.write().await;
        if execution.id.get() == 0 {
            execution.id = ExecutionId::new(state.next_id());
        }
        let now = Utc::now();
        execution.created = now;
        execution.updated = now;
        execution.stages.clear();
        state.executions.insert(execution.id, execution.clone());
        execution
    }

    pub async fn insert_pipeline(&self, mut pipeline: Pipeline) -> Pipeline {
        let mut state = self.state.write().await;
        if pipeline.id.get() == 0 {
            pipeline.id = PipelineId::new(state.next_id());
        }
        state.pipelines.insert(pipeline.id, pipeline.clone());
        pipeline
    }

    pub async fn insert_repo(&self, mut repo: Repository) -> Repository {
        let mut state = self.state.write().await;
        if repo.id.get() == 0 {
            repo.id = RepoId::new(state.next_id());
        }
        state.repos.insert(repo.id, repo.clone());
        repo
    }

    pub async fn insert_secret(&self, mut secret: Secret) -> Secret {
        let mut state = self.state.write().await;
        if secret.id.get() == 0 {
            secret.id = SecretId::new(state.next_id());
        }
        state.secrets.push(secret.clone());
        secret
    }

    /// Make a file resolvable at a repository path and git ref.
    pub async fn insert_file(
        &self,
        repo_id: RepoId,
        path: &str,
        git_ref: &str,
        data: impl Into<Bytes>,
    ) {
        let data = data.into();
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        let sha = format!("{:016x}", hasher.finish());
        self.state.write().await.files.insert(
            (repo_id, path.to_string(), git_ref.to_string()),
            ConfigFile { data, sha },
        );
    }
}

fn version_conflict(
    what: &str,
    id: impl std::fmt::Display,
    stored: i64,
    given: i64,
) -> conveyor_core::Error {
    conveyor_core::Error::VersionConflict(format!(
        "{} {} is at version {}, update was based on version {}",
        what, id, stored, given
    ))
}
