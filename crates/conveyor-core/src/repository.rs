//! Repository types.

use serde::{Deserialize, Serialize};

use crate::{RepoId, SpaceId};

/// A Git repository hosting pipelines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    /// Space owning this repository; secrets are resolved against it.
    pub parent_id: SpaceId,
    pub identifier: String,
    /// Full path, e.g. `acme/backend/api`.
    pub path: String,
    pub default_branch: String,
    /// Clone URL as seen from build containers. Populated when a stage's
    /// execution context is assembled.
    pub git_url: String,
}
