//! Secret types.

use serde::{Deserialize, Serialize};

use crate::{SecretId, SpaceId};

/// A secret visible to pipelines of a space.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Secret {
    pub id: SecretId,
    pub space_id: SpaceId,
    pub identifier: String,
    pub data: String,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("space_id", &self.space_id)
            .field("identifier", &self.identifier)
            .field("data", &"<redacted>")
            .finish()
    }
}
