//! Stage completion.

use chrono::Utc;
use conveyor_core::Result;
use conveyor_core::execution::Execution;
use conveyor_core::stage::{Stage, StageStatus};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::manager::Manager;

/// Whether every sibling named in `stage.depends_on` is done. Names that
/// match no sibling do not block.
fn deps_complete(stage: &Stage, siblings: &[Stage]) -> bool {
    let deps: HashSet<&str> = stage.depends_on.iter().map(String::as_str).collect();
    siblings
        .iter()
        .filter(|s| deps.contains(s.name.as_str()))
        .all(|s| s.status.is_done())
}

impl Manager {
    /// Record a finished stage, release or skip the stages waiting on it,
    /// and complete the execution once every stage is done.
    pub(crate) async fn teardown(&self, mut stage: Stage) -> Result<Stage> {
        let s = &self.services;
        let now = Utc::now();

        let execution = s
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
        let stopped = *stage.stopped.get_or_insert(now);
        stage.started.get_or_insert(stopped);
        stage.updated = now;

        let mut stage = s
            .stages
            .update(&stage)
            .await
            .map_err(|e| e.context("update stage"))?;

        for step in &steps {
            if let Err(e) = s.live.delete(step.id).await {
                debug!(step_id = %step.id, error = %e, "No log stream to tear down");
            }
        }
        stage.steps = steps;

        info!(
            stage_id = %stage.id,
            stage = %stage.name,
            status = %stage.status,
            repo = %repo.path,
            build = execution.number,
            "Stage finished"
        );

        let mut siblings = s
            .stages
            .list(stage.execution_id)
            .await
            .map_err(|e| e.context("list stages"))?;

        self.cancel_downstream(&mut siblings).await?;
        self.schedule_downstream(&mut siblings).await?;

        if siblings.iter().all(|s| s.status.is_done()) {
            self.finish_execution(execution, &siblings).await?;
        }

        s.scheduler
            .schedule(&stage)
            .await
            .map_err(|e| e.context("schedule stage"))?;
        Ok(stage)
    }

    /// Skip waiting stages whose run condition can no longer be met.
    async fn cancel_downstream(&self, siblings: &mut [Stage]) -> Result<()> {
        let failed = siblings.iter().any(|s| s.status.is_failed());
        let now = Utc::now();

        for i in 0..siblings.len() {
            let sibling = &siblings[i];
            if sibling.status != StageStatus::Waiting {
                continue;
            }
            let skip = (failed && !sibling.on_failure) || (!failed && !sibling.on_success);
            if !skip || !deps_complete(sibling, siblings) {
                continue;
            }

            let mut next = sibling.clone();
            next.status = StageStatus::Skipped;
            next.started = Some(now);
            next.stopped = Some(now);
            next.updated = now;
            match self.services.stages.update(&next).await {
                Ok(updated) => {
                    debug!(stage_id = %updated.id, stage = %updated.name, "Skipped stage");
                    siblings[i] = updated;
                }
                Err(e) if e.is_version_conflict() => {
                    debug!(stage_id = %next.id, "Stage updated concurrently, not skipping");
                }
                Err(e) => return Err(e.context("skip stage")),
            }
        }
        Ok(())
    }

    /// Move waiting stages whose dependencies are all done to pending and
    /// hand them to the scheduler.
    async fn schedule_downstream(&self, siblings: &mut [Stage]) -> Result<()> {
        let now = Utc::now();

        for i in 0..siblings.len() {
            let sibling = &siblings[i];
            if sibling.status != StageStatus::Waiting || sibling.depends_on.is_empty() {
                continue;
            }
            if !deps_complete(sibling, siblings) {
                continue;
            }

            let mut next = sibling.clone();
            next.status = StageStatus::Pending;
            next.updated = now;
            let updated = match self.services.stages.update(&next).await {
                Ok(updated) => updated,
                Err(e) if e.is_version_conflict() => {
                    debug!(stage_id = %next.id, "Stage updated concurrently, not scheduling");
                    continue;
                }
                Err(e) => return Err(e.context("release stage")),
            };

            debug!(stage_id = %updated.id, stage = %updated.name, "Released stage");
            self.services
                .scheduler
                .schedule(&updated)
                .await
                .map_err(|e| e.context("schedule stage"))?;
            siblings[i] = updated;
        }
        Ok(())
    }

    /// Record the final status of an execution whose stages are all done.
    /// The first failed stage decides the status.
    async fn finish_execution(&self, mut execution: Execution, stages: &[Stage]) -> Result<()> {
        let now = Utc::now();

        execution.status = stages
            .iter()
            .map(|s| s.status)
            .find(StageStatus::is_failed)
            .unwrap_or(StageStatus::Success);
        let finished = stages.iter().filter_map(|s| s.stopped).max().unwrap_or(now);
        execution.finished = Some(finished);
        execution.started.get_or_insert(finished);
        execution.updated = now;

        match self.services.executions.update(&execution).await {
            Ok(execution) => {
                info!(
                    execution_id = %execution.id,
                    build = execution.number,
                    status = %execution.status,
                    "Execution finished"
                );
                Ok(())
            }
            Err(e) if e.is_version_conflict() => {
                debug!(execution_id = %execution.id, "Execution already finished by another stage");
                Ok(())
            }
            Err(e) => Err(e.context("update execution")),
        }
    }
}
