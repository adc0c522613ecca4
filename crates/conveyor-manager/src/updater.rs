//! Step status propagation.

use chrono::Utc;
use conveyor_core::Result;
use conveyor_core::stage::{StageStatus, Step};
use tracing::debug;

use crate::manager::Manager;

impl Manager {
    /// Persist a step's reported status and carry it up to its stage and
    /// execution: a step that has begun makes a pending stage running, and
    /// a pending execution becomes running.
    pub(crate) async fn update_status(&self, mut step: Step) -> Result<Step> {
        let s = &self.services;
        let now = Utc::now();

        if step.status == StageStatus::Running && step.started.is_none() {
            step.started = Some(now);
        }
        if step.status.is_done() && step.stopped.is_none() {
            step.stopped = Some(now);
            step.started.get_or_insert(now);
        }
        step.truncate_error();

        let step = s
            .steps
            .update(&step)
            .await
            .map_err(|e| e.context("update step"))?;

        let mut stage = s
            .stages
            .find(step.stage_id)
            .await
            .map_err(|e| e.context("find stage"))?;
        if stage.status == StageStatus::Pending && step.status != StageStatus::Pending {
            stage.status = StageStatus::Running;
            stage.started.get_or_insert(now);
            stage.updated = now;
            stage = s
                .stages
                .update(&stage)
                .await
                .map_err(|e| e.context("update stage"))?;
        }

        let mut execution = s
            .executions
            .find(stage.execution_id)
            .await
            .map_err(|e| e.context("find execution"))?;
        if execution.status == StageStatus::Pending {
            execution.status = StageStatus::Running;
            execution.started.get_or_insert(now);
            execution.updated = now;
            match s.executions.update(&execution).await {
                Ok(_) => {}
                Err(e) if e.is_version_conflict() => {
                    debug!(execution_id = %execution.id, "Execution already updated by another agent");
                }
                Err(e) => return Err(e.context("update execution")),
            }
        }

        Ok(step)
    }
}
