//! Archive of complete step logs.

use async_trait::async_trait;
use conveyor_core::log::LogStore;
use conveyor_core::{Error, Result, StepId};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

/// Keeps uploaded step logs in memory.
#[derive(Default)]
pub struct MemoryLogStore {
    logs: RwLock<HashMap<StepId, Vec<u8>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn create(&self, step: StepId, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| Error::Store(format!("read log upload for step {}: {}", step, e)))?;
        self.logs.write().await.insert(step, data);
        Ok(())
    }

    async fn find(&self, step: StepId) -> Result<Vec<u8>> {
        self.logs
            .read()
            .await
            .get(&step)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("log for step {}", step)))
    }
}
