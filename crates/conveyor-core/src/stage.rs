//! Stage and step definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{ExecutionId, RepoId, StageId, StepId};

/// Default resource kind when a stage or worker leaves it empty.
pub const DEFAULT_KIND: &str = "pipeline";

/// Default resource type when a stage or worker leaves it empty.
pub const DEFAULT_TYPE: &str = "docker";

/// Maximum stored length of a stage or step error message.
pub const MAX_ERROR_LEN: usize = 500;

/// Status of a stage, step or execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Ready to be matched with a worker (or claimed and about to start).
    #[default]
    Pending,
    /// Waiting for the stages it depends on to finish.
    #[serde(rename = "waiting_on_dependencies")]
    Waiting,
    /// Held back pending approval.
    Blocked,
    /// Currently executing on an agent.
    Running,
    Success,
    Failure,
    Error,
    Killed,
    /// Never ran (dependencies failed or condition not met).
    Skipped,
}

impl StageStatus {
    /// Whether the status is final.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            StageStatus::Success
                | StageStatus::Failure
                | StageStatus::Error
                | StageStatus::Killed
                | StageStatus::Skipped
        )
    }

    /// Whether the status is a final, unsuccessful one.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            StageStatus::Failure | StageStatus::Error | StageStatus::Killed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Waiting => "waiting_on_dependencies",
            StageStatus::Blocked => "blocked",
            StageStatus::Running => "running",
            StageStatus::Success => "success",
            StageStatus::Failure => "failure",
            StageStatus::Error => "error",
            StageStatus::Killed => "killed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "waiting_on_dependencies" => Ok(StageStatus::Waiting),
            "blocked" => Ok(StageStatus::Blocked),
            "running" => Ok(StageStatus::Running),
            "success" => Ok(StageStatus::Success),
            "failure" => Ok(StageStatus::Failure),
            "error" => Ok(StageStatus::Error),
            "killed" => Ok(StageStatus::Killed),
            "skipped" => Ok(StageStatus::Skipped),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Operating system and architecture a stage needs, or a worker offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    /// Architecture variant (e.g. arm6, arm7).
    pub variant: String,
    /// Kernel version (e.g. 1709, 1803 on Windows).
    pub kernel: String,
}

impl Platform {
    /// Whether any field is set.
    pub fn is_specified(&self) -> bool {
        !self.os.is_empty()
            || !self.arch.is_empty()
            || !self.variant.is_empty()
            || !self.kernel.is_empty()
    }
}

/// A schedulable unit of a pipeline execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub execution_id: ExecutionId,
    pub repo_id: RepoId,
    /// Position within the execution (1-based).
    pub number: i64,
    pub name: String,
    /// Resource kind, e.g. "pipeline".
    pub kind: String,
    /// Resource type, e.g. "docker" or "exec".
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(flatten)]
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Agent machine that claimed this stage; empty until accepted.
    pub machine: String,
    pub status: StageStatus,
    pub error: String,
    pub errignore: bool,
    pub exit_code: i32,
    /// Maximum concurrent stages with this name in the repository (0 = unlimited).
    pub limit: u32,
    /// Maximum concurrent stages in the repository (0 = unlimited).
    pub limit_repo: u32,
    pub on_success: bool,
    pub on_failure: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by every successful update.
    pub version: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

impl Stage {
    /// Whether this stage was claimed by an agent.
    pub fn is_assigned(&self) -> bool {
        !self.machine.is_empty()
    }

    /// Truncate the error message to the stored maximum.
    pub fn truncate_error(&mut self) {
        truncate(&mut self.error, MAX_ERROR_LEN);
    }
}

/// A unit of work within a stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub stage_id: StageId,
    pub number: i64,
    pub name: String,
    pub status: StageStatus,
    pub error: String,
    pub errignore: bool,
    pub exit_code: i32,
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Step {
    pub fn truncate_error(&mut self) {
        truncate(&mut self.error, MAX_ERROR_LEN);
    }
}

fn truncate(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
