//! Execution and pipeline records.

use async_trait::async_trait;
use conveyor_core::execution::{Execution, Pipeline};
use conveyor_core::store::{ExecutionStore, PipelineStore};
use conveyor_core::{Error, ExecutionId, PipelineId, Result};

use super::{MemoryStore, version_conflict};

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn find(&self, id: ExecutionId) -> Result<Execution> {
        self.state
            .read()
            .await
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("execution {}", id)))
    }

    async fn update(&self, execution: &Execution) -> Result<Execution> {
        let mut state = self.state.write().await;
        let stored = state
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| Error::NotFound(format!("execution {}", execution.id)))?;
        if stored.version != execution.version {
            return Err(version_conflict(
                "execution",
                execution.id,
                stored.version,
                execution.version,
            ));
        }

        let mut next = execution.clone();
        next.version += 1;
        next.created = stored.created;
        next.stages.clear();
        *stored = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn find(&self, id: PipelineId) -> Result<Pipeline> {
        self.state
            .read()
            .await
            .pipelines
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("pipeline {}", id)))
    }
}
