use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::Node;

/// An immutable version of the whole forest. Once committed a snapshot is
/// never touched again; commands build the next one from a deep clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub roots: Vec<Node>,
}

impl Snapshot {
    pub fn new(roots: Vec<Node>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            roots,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}
