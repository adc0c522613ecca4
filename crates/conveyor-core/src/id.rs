//! Resource identifiers.
//!
//! Identifiers are store-assigned, monotonically increasing integers. Stage
//! ids double as the relative age of a stage: the limit and throttle policies
//! admit older (smaller id) stages first.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            Display,
            From,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw store identifier.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw identifier.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

resource_id!(
    /// Identifies a stage. Smaller ids were created earlier.
    StageId
);
resource_id!(
    /// Identifies a step within a stage.
    StepId
);
resource_id!(
    /// Identifies an execution (a single pipeline run).
    ExecutionId
);
resource_id!(
    /// Identifies a pipeline definition.
    PipelineId
);
resource_id!(
    /// Identifies a repository.
    RepoId
);
resource_id!(
    /// Identifies a space (the parent scope owning repositories and secrets).
    SpaceId
);
resource_id!(SecretId);
