//! The execution manager contract and its implementation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use conveyor_config::{HttpConfig, ServerConfig};
use conveyor_core::log::{Line, LogStore, LogStream};
use conveyor_core::stage::{Stage, StageStatus, Step};
use conveyor_core::store::{
    ExecutionStore, FileService, PipelineStore, RepoStore, SecretStore, StageStore, StepStore,
};
use conveyor_core::{Error, Result, StageId, StepId};
use conveyor_scheduler::Scheduler;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::clone_url::clone_url;
use crate::context::{Context, Request};

/// Operations a build agent performs over a stage's lifetime.
#[async_trait]
pub trait ExecutionManager: Send + Sync {
    /// Wait for the next stage the agent is able to run.
    async fn request(&self, args: Request, cancel: &CancellationToken) -> Result<Stage>;

    /// Claim a stage for `machine`. Several agents may have been handed the
    /// same stage; only the first to accept wins.
    async fn accept(&self, stage: StageId, machine: &str) -> Result<Stage>;

    /// Append a line to a step's live log.
    async fn write(&self, step: StepId, line: &Line) -> Result<()>;

    /// Everything needed to execute a stage.
    async fn details(&self, stage: StageId) -> Result<Context>;

    /// Store the complete log of a step.
    async fn upload(&self, step: StepId, reader: &mut (dyn AsyncRead + Send + Unpin))
    -> Result<()>;

    async fn upload_bytes(&self, step: StepId, data: Bytes) -> Result<()>;

    /// A step is about to start.
    async fn before(&self, step: Step) -> Result<Step>;

    /// A step has finished.
    async fn after(&self, step: Step) -> Result<Step>;

    /// A stage is about to start; creates its steps.
    async fn before_all(&self, stage: Stage) -> Result<Stage>;

    /// A stage has finished; releases dependent stages and completes the
    /// execution once every stage is done.
    async fn after_all(&self, stage: Stage) -> Result<Stage>;
}

/// Collaborators the manager works against.
#[derive(Clone)]
pub struct Services {
    pub stages: Arc<dyn StageStore>,
    pub steps: Arc<dyn StepStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub pipelines: Arc<dyn PipelineStore>,
    pub repos: Arc<dyn RepoStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub files: Arc<dyn FileService>,
    /// Archive of complete step logs.
    pub logs: Arc<dyn LogStore>,
    /// Live step logs.
    pub live: Arc<dyn LogStream>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Default [`ExecutionManager`].
pub struct Manager {
    pub(crate) services: Services,
    http: HttpConfig,
}

impl Manager {
    pub fn new(services: Services, server: &ServerConfig) -> Self {
        Self {
            services,
            http: server.http.clone(),
        }
    }
}

/// Log a failed lookup while assembling a stage's context and wrap it.
fn missing(what: &'static str, stage_id: StageId) -> impl FnOnce(Error) -> Error {
    move |e| {
        warn!(stage_id = %stage_id, what, error = %e, "Cannot load stage dependency");
        e.dependency(what)
    }
}

#[async_trait]
impl ExecutionManager for Manager {
    async fn request(&self, args: Request, cancel: &CancellationToken) -> Result<Stage> {
        debug!(
            kind = %args.kind,
            stage_type = %args.stage_type,
            os = %args.os,
            arch = %args.arch,
            kernel = %args.kernel,
            variant = %args.variant,
            "Requesting stage"
        );

        match self.services.scheduler.request(args.into(), cancel).await {
            Ok(stage) => Ok(stage),
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                debug!(error = %e, "Stage request cancelled");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Stage request failed");
                Err(e)
            }
        }
    }

    async fn accept(&self, stage_id: StageId, machine: &str) -> Result<Stage> {
        debug!(stage_id = %stage_id, machine, "Accepting stage");
        if machine.is_empty() {
            return Err(Error::InvalidInput("machine must not be empty".to_string()));
        }

        let mut stage = self.services.stages.find(stage_id).await.map_err(|e| {
            warn!(stage_id = %stage_id, error = %e, "Cannot find stage");
            e.context("find stage")
        })?;
        if stage.is_assigned() {
            debug!(stage_id = %stage_id, assigned = %stage.machine, "Stage already assigned");
            return Err(Error::AlreadyAssigned {
                stage: stage.id,
                machine: stage.machine,
            });
        }

        stage.machine = machine.to_string();
        stage.status = StageStatus::Pending;
        stage.updated = Utc::now();

        match self.services.stages.update(&stage).await {
            Ok(stage) => {
                debug!(stage_id = %stage_id, machine, "Stage accepted");
                Ok(stage)
            }
            Err(e) if e.is_version_conflict() => {
                debug!(stage_id = %stage_id, machine, "Stage processed by another agent");
                Err(e)
            }
            Err(e) => {
                debug!(stage_id = %stage_id, error = %e, "Cannot update stage");
                Err(e.context("update stage"))
            }
        }
    }

    async fn write(&self, step: StepId, line: &Line) -> Result<()> {
        self.services
            .live
            .write(step, line)
            .await
            .inspect_err(|e| warn!(step_id = %step, error = %e, "Cannot write to log stream"))
    }

    async fn details(&self, stage_id: StageId) -> Result<Context> {
        debug!(stage_id = %stage_id, "Fetching stage details");
        let s = &self.services;

        let stage = s.stages.find(stage_id).await.map_err(missing("stage", stage_id))?;
        let mut execution = s
            .executions
            .find(stage.execution_id)
            .await
            .map_err(missing("execution", stage_id))?;
        let pipeline = s
            .pipelines
            .find(execution.pipeline_id)
            .await
            .map_err(missing("pipeline", stage_id))?;
        let mut repo = s
            .repos
            .find(execution.repo_id)
            .await
            .map_err(missing("repository", stage_id))?;
        repo.git_url = clone_url(&self.http, &repo.path).map_err(missing("clone url", stage_id))?;

        execution.stages = s
            .stages
            .list(stage.execution_id)
            .await
            .map_err(missing("stages", stage_id))?;

        let secrets = s
            .secrets
            .list_all(repo.parent_id)
            .await
            .map_err(missing("secrets", stage_id))?;

        let config = s
            .files
            .get(&repo, &pipeline.config_path, &execution.after)
            .await
            .map_err(missing("config", stage_id))?;

        debug!(
            stage_id = %stage_id,
            build = execution.number,
            repo = %repo.identifier,
            secrets = secrets.len(),
            "Assembled stage details"
        );

        Ok(Context {
            repo,
            build: execution,
            stage,
            secrets,
            config,
        })
    }

    async fn upload(
        &self,
        step: StepId,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        self.services
            .logs
            .create(step, reader)
            .await
            .inspect_err(|e| error!(step_id = %step, error = %e, "Cannot upload complete logs"))
    }

    async fn upload_bytes(&self, step: StepId, data: Bytes) -> Result<()> {
        let mut reader: &[u8] = &data;
        self.upload(step, &mut reader).await
    }

    async fn before(&self, step: Step) -> Result<Step> {
        debug!(
            step_id = %step.id,
            name = %step.name,
            status = %step.status,
            "Step starting"
        );

        self.services.live.create(step.id).await.map_err(|e| {
            warn!(step_id = %step.id, error = %e, "Cannot create log stream");
            e.context("create log stream")
        })?;
        self.update_status(step).await
    }

    async fn after(&self, step: Step) -> Result<Step> {
        debug!(
            step_id = %step.id,
            name = %step.name,
            status = %step.status,
            "Step finished"
        );

        let step_id = step.id;
        let result = self.update_status(step).await;
        if let Err(e) = &result {
            warn!(step_id = %step_id, error = %e, "Cannot update step");
        }
        if let Err(e) = self.services.live.delete(step_id).await {
            warn!(step_id = %step_id, error = %e, "Cannot tear down log stream");
        }
        result
    }

    async fn before_all(&self, stage: Stage) -> Result<Stage> {
        self.setup(stage).await
    }

    async fn after_all(&self, stage: Stage) -> Result<Stage> {
        self.teardown(stage).await
    }
}
