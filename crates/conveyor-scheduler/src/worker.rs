//! Registered requests for work and how they match stages.

use conveyor_core::stage::{DEFAULT_KIND, DEFAULT_TYPE, Platform, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Criteria an agent supplies when requesting a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub kind: String,
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(flatten)]
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl Filter {
    /// Whether a stage satisfies this filter.
    ///
    /// A worker that declares any platform field only takes stages built for
    /// exactly its OS and architecture; a stage's variant and kernel, when
    /// set, must also equal the worker's. A stage with no platform therefore
    /// only goes to workers that declare no platform either. Labels must be
    /// identical whenever either side has any.
    pub fn accepts(&self, stage: &Stage) -> bool {
        if !match_resource(&self.kind, &self.stage_type, &stage.kind, &stage.stage_type) {
            return false;
        }
        if self.platform.is_specified() && !match_platform(&self.platform, &stage.platform) {
            return false;
        }
        if (!stage.labels.is_empty() || !self.labels.is_empty())
            && !match_labels(&stage.labels, &self.labels)
        {
            return false;
        }
        true
    }
}

/// A waiting request. The slot is used at most once, to deliver the matched
/// stage, and only while the registry lock is held.
pub(crate) struct Worker {
    pub(crate) filter: Filter,
    pub(crate) slot: oneshot::Sender<Stage>,
}

/// Compare resource classes, treating empty kind as "pipeline" and empty
/// type as "docker" on both sides.
pub fn match_resource(kind_a: &str, type_a: &str, kind_b: &str, type_b: &str) -> bool {
    fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
        if value.is_empty() { default } else { value }
    }

    or_default(kind_a, DEFAULT_KIND) == or_default(kind_b, DEFAULT_KIND)
        && or_default(type_a, DEFAULT_TYPE) == or_default(type_b, DEFAULT_TYPE)
}

fn match_platform(worker: &Platform, stage: &Platform) -> bool {
    if worker.os != stage.os || worker.arch != stage.arch {
        return false;
    }
    // e.g. arm6 vs arm7
    if !stage.variant.is_empty() && stage.variant != worker.variant {
        return false;
    }
    // e.g. 1709 vs 1803
    if !stage.kernel.is_empty() && stage.kernel != worker.kernel {
        return false;
    }
    true
}

fn match_labels(a: &HashMap<String, String>, b: &HashMap<String, String>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
}
