//! In-memory wiring for manager tests.

use async_trait::async_trait;
use conveyor_config::ServerConfig;
use conveyor_core::execution::{Execution, Pipeline};
use conveyor_core::repository::Repository;
use conveyor_core::secret::Secret;
use conveyor_core::stage::{Stage, StageStatus};
use conveyor_core::{Error, ExecutionId, Result, SpaceId, StageId};
use conveyor_db::{LocalMutexManager, MemoryLogStore, MemoryLogStream, MemoryStore};
use conveyor_scheduler::{Filter, Queue, Scheduler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::manager::{Manager, Services};

pub(crate) const CONFIG_PATH: &str = ".conveyor/ci.yaml";
pub(crate) const COMMIT: &str = "8d2f1c0";

/// Forwards to the queue and remembers every scheduled stage.
pub(crate) struct Recorder {
    queue: Arc<Queue>,
    scheduled: Mutex<Vec<StageId>>,
    failing: AtomicBool,
}

#[async_trait]
impl Scheduler for Recorder {
    async fn schedule(&self, stage: &Stage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("scheduler unavailable".to_string()));
        }
        self.scheduled.lock().unwrap().push(stage.id);
        self.queue.schedule(stage).await
    }

    async fn pause(&self) -> Result<()> {
        self.queue.pause().await
    }

    async fn resume(&self) -> Result<()> {
        self.queue.resume().await
    }

    async fn request(&self, filter: Filter, cancel: &CancellationToken) -> Result<Stage> {
        self.queue.request(filter, cancel).await
    }
}

pub(crate) struct Seeded {
    pub execution: Execution,
}

pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub live: Arc<MemoryLogStream>,
    pub logs: Arc<MemoryLogStore>,
    pub queue: Arc<Queue>,
    pub recorder: Arc<Recorder>,
    pub manager: Arc<Manager>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let live = Arc::new(MemoryLogStream::new());
        let logs = Arc::new(MemoryLogStore::new());
        let queue = Arc::new(Queue::new(store.clone(), Arc::new(LocalMutexManager::new())));
        let recorder = Arc::new(Recorder {
            queue: queue.clone(),
            scheduled: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        });

        let services = Services {
            stages: store.clone(),
            steps: store.clone(),
            executions: store.clone(),
            pipelines: store.clone(),
            repos: store.clone(),
            secrets: store.clone(),
            files: store.clone(),
            logs: logs.clone(),
            live: live.clone(),
            scheduler: recorder.clone(),
        };
        let manager = Arc::new(Manager::new(services, &ServerConfig::default()));

        Self {
            store,
            live,
            logs,
            queue,
            recorder,
            manager,
        }
    }

    /// A repository with one pipeline, a pending execution of it, a secret
    /// in the owning space and the pipeline file at the execution's commit.
    pub async fn seed(&self) -> Seeded {
        let repo = self
            .store
            .insert_repo(Repository {
                parent_id: SpaceId::new(10),
                identifier: "api".to_string(),
                path: "acme/api".to_string(),
                default_branch: "main".to_string(),
                ..Default::default()
            })
            .await;
        let pipeline = self
            .store
            .insert_pipeline(Pipeline {
                repo_id: repo.id,
                identifier: "ci".to_string(),
                config_path: CONFIG_PATH.to_string(),
                default_branch: "main".to_string(),
                ..Default::default()
            })
            .await;
        let execution = self
            .store
            .insert_execution(Execution {
                pipeline_id: pipeline.id,
                repo_id: repo.id,
                number: 1,
                status: StageStatus::Pending,
                event: "push".to_string(),
                git_ref: "refs/heads/main".to_string(),
                after: COMMIT.to_string(),
                ..Default::default()
            })
            .await;
        self.store
            .insert_secret(Secret {
                space_id: repo.parent_id,
                identifier: "token".to_string(),
                data: "hunter2".to_string(),
                ..Default::default()
            })
            .await;
        self.store
            .insert_file(repo.id, CONFIG_PATH, COMMIT, "kind: pipeline\n")
            .await;

        Seeded { execution }
    }

    pub async fn pending_stage(&self, execution_id: ExecutionId, name: &str) -> Stage {
        self.store
            .insert_stage(Stage {
                execution_id,
                name: name.to_string(),
                status: StageStatus::Pending,
                ..Default::default()
            })
            .await
    }

    /// Make every later `schedule` call fail.
    pub fn fail_schedule(&self) {
        self.recorder.failing.store(true, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> Vec<StageId> {
        self.recorder.scheduled.lock().unwrap().clone()
    }
}
