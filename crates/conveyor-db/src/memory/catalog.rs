//! Repositories, secrets and repository file contents.

use async_trait::async_trait;
use conveyor_core::execution::ConfigFile;
use conveyor_core::repository::Repository;
use conveyor_core::secret::Secret;
use conveyor_core::store::{FileService, RepoStore, SecretStore};
use conveyor_core::{Error, RepoId, Result, SpaceId};

use super::MemoryStore;

#[async_trait]
impl RepoStore for MemoryStore {
    async fn find(&self, id: RepoId) -> Result<Repository> {
        self.state
            .read()
            .await
            .repos
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("repository {}", id)))
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn list_all(&self, space_id: SpaceId) -> Result<Vec<Secret>> {
        let mut secrets: Vec<Secret> = self
            .state
            .read()
            .await
            .secrets
            .iter()
            .filter(|s| s.space_id == space_id)
            .cloned()
            .collect();
        secrets.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(secrets)
    }
}

#[async_trait]
impl FileService for MemoryStore {
    async fn get(&self, repo: &Repository, path: &str, git_ref: &str) -> Result<ConfigFile> {
        self.state
            .read()
            .await
            .files
            .get(&(repo.id, path.to_string(), git_ref.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("file {} at {} in {}", path, git_ref, repo.path))
            })
    }
}
