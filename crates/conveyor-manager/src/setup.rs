//! Stage start.

use chrono::Utc;
use conveyor_core::Result;
use conveyor_core::stage::{Stage, StageStatus};
use tracing::{debug, info};

use crate::manager::Manager;

impl Manager {
    /// Mark a stage running and create the steps it carries. Returns the
    /// stored stage with the created steps attached.
    pub(crate) async fn setup(&self, mut stage: Stage) -> Result<Stage> {
        let s = &self.services;
        let now = Utc::now();

        let mut execution = s
            .executions
            .find(stage.execution_id)
            .await
            .map_err(|e| e.context("find execution"))?;
        let repo = s
            .repos
            .find(execution.repo_id)
            .await
            .map_err(|e| e.context("find repository"))?;

        let steps = std::mem::take(&mut stage.steps);
        stage.truncate_error();
        if !stage.status.is_done() {
            stage.status = StageStatus::Running;
        }
        stage.started.get_or_insert(now);
        stage.updated = now;

        let mut stage = s
            .stages
            .update(&stage)
            .await
            .map_err(|e| e.context("update stage"))?;

        for mut step in steps {
            step.stage_id = stage.id;
            step.truncate_error();
            let created = s
                .steps
                .create(&step)
                .await
                .map_err(|e| e.context("create step"))?;
            stage.steps.push(created);
        }

        if execution.status == StageStatus::Pending {
            execution.status = StageStatus::Running;
            execution.started.get_or_insert(now);
            execution.updated = now;
            match s.executions.update(&execution).await {
                Ok(_) => {}
                Err(e) if e.is_version_conflict() => {
                    debug!(execution_id = %execution.id, "Execution already started by another stage");
                }
                Err(e) => return Err(e.context("update execution")),
            }
        }

        info!(
            stage_id = %stage.id,
            stage = %stage.name,
            repo = %repo.path,
            build = execution.number,
            steps = stage.steps.len(),
            "Stage started"
        );
        Ok(stage)
    }
}
