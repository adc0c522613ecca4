//! Agent-facing request and context shapes.

use conveyor_core::execution::{ConfigFile, Execution};
use conveyor_core::repository::Repository;
use conveyor_core::secret::Secret;
use conveyor_core::stage::{Platform, Stage};
use conveyor_scheduler::Filter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What an agent is able to run. An agent typically advertises its own
/// platform so it only receives stages it can execute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub kind: String,
    #[serde(default, rename = "type")]
    pub stage_type: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub variant: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl From<Request> for Filter {
    fn from(req: Request) -> Self {
        Filter {
            kind: req.kind,
            stage_type: req.stage_type,
            platform: Platform {
                os: req.os,
                arch: req.arch,
                variant: req.variant,
                kernel: req.kernel,
            },
            labels: req.labels,
        }
    }
}

/// The minimum an agent needs to execute a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    #[serde(rename = "repository")]
    pub repo: Repository,
    /// The execution, with every stage of it attached.
    pub build: Execution,
    pub stage: Stage,
    pub secrets: Vec<Secret>,
    pub config: ConfigFile,
}
