//! Named mutual exclusion shared between server replicas.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Provides named locks. A lock acquired on one replica excludes every other
/// replica sharing the same backend until it is released.
#[async_trait]
pub trait MutexManager: Send + Sync {
    /// Block until the named lock is held, or fail with
    /// [`Error::Cancelled`](crate::Error) if `cancel` fires first.
    async fn acquire(&self, name: &str, cancel: &CancellationToken) -> Result<()>;

    /// Release a lock previously acquired by this manager.
    async fn release(&self, name: &str) -> Result<()>;
}
