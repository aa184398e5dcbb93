use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{DrawingId, InternalId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawingInfo {
    pub id: DrawingId,
    pub artist_id: InternalId,
    pub title: String,
    pub created_at: String,
    #[serde(default)]
    pub liked_by: Vec<InternalId>,
}

impl DrawingInfo {
    #[must_use]
    pub fn likes(&self) -> usize {
        self.liked_by.len()
    }
}

/// The drawings collection, keyed by drawing id.
pub type Drawings = BTreeMap<DrawingId, DrawingInfo>;
