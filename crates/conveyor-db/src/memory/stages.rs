//! Stage and step records.

use async_trait::async_trait;
use conveyor_core::stage::{Stage, StageStatus, Step};
use conveyor_core::store::{StageStore, StepStore};
use conveyor_core::{Error, ExecutionId, Result, StageId, StepId};

use super::{MemoryStore, State, version_conflict};

impl State {
    fn steps_of(&self, stage_id: StageId) -> Vec<Step> {
        let mut steps: Vec<Step> = self
            .steps
            .values()
            .filter(|s| s.stage_id == stage_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| (s.number, s.id));
        steps
    }
}

#[async_trait]
impl StageStore for MemoryStore {
    async fn find(&self, id: StageId) -> Result<Stage> {
        self.state
            .read()
            .await
            .stages
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("stage {}", id)))
    }

    async fn update(&self, stage: &Stage) -> Result<Stage> {
        let mut state = self.state.write().await;
        let stored = state
            .stages
            .get_mut(&stage.id)
            .ok_or_else(|| Error::NotFound(format!("stage {}", stage.id)))?;
        if stored.version != stage.version {
            return Err(version_conflict("stage", stage.id, stored.version, stage.version));
        }

        let mut next = stage.clone();
        next.version += 1;
        next.created = stored.created;
        next.steps.clear();
        *stored = next.clone();
        Ok(next)
    }

    async fn list(&self, execution_id: ExecutionId) -> Result<Vec<Stage>> {
        let state = self.state.read().await;
        let mut stages: Vec<Stage> = state
            .stages
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| (s.number, s.id));
        for stage in &mut stages {
            stage.steps = state.steps_of(stage.id);
        }
        Ok(stages)
    }

    async fn list_incomplete(&self) -> Result<Vec<Stage>> {
        // BTreeMap iteration is ascending by id, i.e. creation order.
        Ok(self
            .state
            .read()
            .await
            .stages
            .values()
            .filter(|s| matches!(s.status, StageStatus::Pending | StageStatus::Running))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StepStore for MemoryStore {
    async fn find(&self, id: StepId) -> Result<Step> {
        self.state
            .read()
            .await
            .steps
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("step {}", id)))
    }

    async fn create(&self, step: &Step) -> Result<Step> {
        let mut state = self.state.write().await;
        if !state.stages.contains_key(&step.stage_id) {
            return Err(Error::NotFound(format!("stage {}", step.stage_id)));
        }

        let mut created = step.clone();
        if created.id.get() == 0 {
            created.id = StepId::new(state.next_id());
        } else if state.steps.contains_key(&created.id) {
            return Err(Error::InvalidInput(format!("step {} already exists", created.id)));
        }
        state.steps.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, step: &Step) -> Result<Step> {
        let mut state = self.state.write().await;
        let stored = state
            .steps
            .get_mut(&step.id)
            .ok_or_else(|| Error::NotFound(format!("step {}", step.id)))?;
        if stored.version != step.version {
            return Err(version_conflict("step", step.id, stored.version, step.version));
        }

        let mut next = step.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list(&self, stage_id: StageId) -> Result<Vec<Step>> {
        Ok(self.state.read().await.steps_of(stage_id))
    }
}
