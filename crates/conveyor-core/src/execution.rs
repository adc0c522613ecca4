//! Executions (pipeline runs) and pipeline definitions.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::{Stage, StageStatus};
use crate::{ExecutionId, PipelineId, RepoId};

/// A single run of a pipeline, composed of ordered stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub pipeline_id: PipelineId,
    pub repo_id: RepoId,
    /// Run number within the pipeline (incrementing).
    pub number: i64,
    pub status: StageStatus,
    pub error: String,
    /// What triggered the run (push, pull_request, manual, ...).
    pub event: String,
    /// Git ref under test, e.g. `refs/heads/main`.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Commit SHA before the change.
    pub before: String,
    /// Commit SHA under test.
    pub after: String,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
}

/// A pipeline definition attached to a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub repo_id: RepoId,
    pub identifier: String,
    /// Path of the pipeline file inside the repository.
    pub config_path: String,
    pub default_branch: String,
}

/// Contents of a pipeline configuration file resolved at a commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub data: Bytes,
    /// Blob SHA of the file at the resolved commit.
    pub sha: String,
}
