//! Mutex managers guarding dispatch passes.
//!
//! [`LocalMutexManager`] excludes tasks within one process and suits a single
//! replica. [`PgMutexManager`] uses PostgreSQL session-level advisory locks so
//! that every replica connected to the same database is excluded.

use async_trait::async_trait;
use conveyor_core::lock::MutexManager;
use conveyor_core::{Error, Result};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{DbError, DbResult};

/// Named locks local to the current process.
#[derive(Default)]
pub struct LocalMutexManager {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    held: Mutex<HashMap<String, OwnedMutexGuard<()>>>,
}

impl LocalMutexManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MutexManager for LocalMutexManager {
    async fn acquire(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let mutex = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone();

        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = mutex.lock_owned() => guard,
        };

        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), guard);
        Ok(())
    }

    async fn release(&self, name: &str) -> Result<()> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .map(drop)
            .ok_or_else(|| DbError::LockNotHeld(name.to_string()).into())
    }
}

/// Named locks backed by PostgreSQL advisory locks.
///
/// Advisory locks belong to a database session, so the connection that
/// acquired a lock is kept out of the pool until the lock is released.
pub struct PgMutexManager {
    pool: PgPool,
    held: tokio::sync::Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PgMutexManager {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: tokio::sync::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MutexManager for PgMutexManager {
    async fn acquire(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let mut conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            conn = self.pool.acquire() => conn.map_err(DbError::from)?,
        };

        let locked = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = sqlx::query("SELECT pg_advisory_lock(hashtext($1))")
                .bind(name)
                .execute(&mut *conn) => Some(res),
        };

        match locked {
            Some(Ok(_)) => {
                debug!(lock = name, "Acquired advisory lock");
                self.held.lock().await.insert(name.to_string(), conn);
                Ok(())
            }
            Some(Err(e)) => Err(DbError::from(e).into()),
            None => {
                // The lock request may still be queued server-side; ending
                // the session withdraws it.
                if let Err(e) = conn.close().await {
                    warn!(lock = name, error = %e, "Failed to close connection after cancelled lock");
                }
                Err(Error::Cancelled)
            }
        }
    }

    async fn release(&self, name: &str) -> Result<()> {
        let mut conn = self
            .held
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| DbError::LockNotHeld(name.to_string()))?;

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(DbError::from)
            .and_then(|unlocked| unlock_outcome(name, unlocked));

        match unlocked {
            Ok(()) => {
                debug!(lock = name, "Released advisory lock");
                Ok(())
            }
            Err(e) => {
                // The session may still hold the lock; ending it releases
                // every advisory lock it owns.
                if let Err(close) = conn.close().await {
                    warn!(lock = name, error = %close, "Failed to close connection after failed unlock");
                }
                Err(e.into())
            }
        }
    }
}

/// Map the result of `pg_advisory_unlock` to an error when the session did
/// not hold the lock.
fn unlock_outcome(name: &str, unlocked: bool) -> DbResult<()> {
    if unlocked {
        Ok(())
    } else {
        Err(DbError::LockNotHeld(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_local_lock_excludes_until_released() {
        let locks = Arc::new(LocalMutexManager::new());
        let cancel = CancellationToken::new();
        locks.acquire("build_queue", &cancel).await.unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                locks.acquire("build_queue", &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        locks.release("build_queue").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_local_lock_acquire_is_cancellable() {
        let locks = LocalMutexManager::new();
        locks
            .acquire("build_queue", &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = locks.acquire("build_queue", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_local_lock_names_are_independent() {
        let locks = LocalMutexManager::new();
        let cancel = CancellationToken::new();
        locks.acquire("a", &cancel).await.unwrap();
        locks.acquire("b", &cancel).await.unwrap();
        locks.release("a").await.unwrap();
        locks.release("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_release_without_acquire_fails() {
        let locks = LocalMutexManager::new();
        assert!(locks.release("build_queue").await.is_err());
    }

    #[test]
    fn test_unlock_outcome() {
        assert!(unlock_outcome("build_queue", true).is_ok());
        let err = unlock_outcome("build_queue", false).unwrap_err();
        assert!(matches!(err, DbError::LockNotHeld(ref name) if name == "build_queue"));
    }

    #[tokio::test]
    async fn test_create_pool_rejects_bad_url() {
        let err = crate::create_pool("not a database url", 1).await.unwrap_err();
        assert!(matches!(err, DbError::Database(_)));
    }

    /// Two managers on separate pools contend for the same advisory lock.
    #[tokio::test]
    #[ignore]
    async fn test_pg_lock_excludes_other_sessions() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let first = PgMutexManager::new(crate::create_pool(&url, 2).await.unwrap());
        let second = PgMutexManager::new(crate::create_pool(&url, 2).await.unwrap());

        first
            .acquire("conveyor_test", &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });
        let err = second.acquire("conveyor_test", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());

        first.release("conveyor_test").await.unwrap();
        second
            .acquire("conveyor_test", &CancellationToken::new())
            .await
            .unwrap();
        second.release("conveyor_test").await.unwrap();
    }
}
