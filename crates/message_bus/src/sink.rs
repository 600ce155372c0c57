use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::BusError;
use crate::patch::Patch;

/// Anything that accepts patches. Implemented by [`crate::MessageBus`];
/// lower layers (the retry engine, the LLM client, the tree store) publish
/// through this trait so they never depend on the bus type itself.
#[async_trait]
pub trait PatchSink: Send + Sync {
    async fn publish(&self, patch: Patch) -> Result<String, BusError>;
}

/// Snapshot object shipped to the front end in place of a bare snapshot id.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub data: Value,
    pub summary: String,
}

/// Resolves snapshot ids to their front-end projection. Implemented by the
/// research-tree store; the bus only needs the lookup.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn snapshot_view(&self, snapshot_id: &str) -> Option<SnapshotView>;
}
