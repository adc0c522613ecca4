//! Backends for the Conveyor collaborator contracts.
//!
//! Provides:
//! - In-memory stores with optimistic versioning (`memory`)
//! - An in-memory live log stream (`livelog`)
//! - Process-local and PostgreSQL advisory-lock mutex managers (`lock`)

pub mod error;
pub mod livelog;
pub mod lock;
pub mod memory;

pub use error::{DbError, DbResult};
pub use livelog::MemoryLogStream;
pub use lock::{LocalMutexManager, PgMutexManager};
pub use memory::{MemoryLogStore, MemoryStore};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}
