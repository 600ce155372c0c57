use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::Role;
use crate::sink::SnapshotView;

/// Sentinel `message_id` that applies a patch to every currently generating
/// message. Kept on the wire for compatibility; used only by the terminal
/// patch of an agent task.
pub const BROADCAST_MESSAGE_ID: &str = "-";

/// A proposed mutation of the message log.
///
/// `message_id == None` creates a new message (then `role` is required).
/// `thinking_delta` / `content_delta` append; the optional fields replace
/// when set. `rollback` erases everything after the target message and
/// resets it to an empty generating state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default)]
    pub message_id: Option<String>,

    #[serde(default)]
    pub thinking_delta: String,
    #[serde(default)]
    pub content_delta: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_node_ids: Option<Vec<String>>,

    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub rollback: bool,
}

impl Patch {
    pub fn is_broadcast(&self) -> bool {
        self.message_id.as_deref() == Some(BROADCAST_MESSAGE_ID)
    }

    pub fn is_terminal(&self) -> bool {
        self.action_title.as_deref() == Some("finished")
    }
}

/// Patch as delivered to an external consumer: when the raw patch carried a
/// `snapshot_id`, the expanded snapshot object rides along.
#[derive(Debug, Clone, Serialize)]
pub struct FrontendPatch {
    #[serde(flatten)]
    pub patch: Patch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotView>,
}

impl FrontendPatch {
    pub fn new(patch: Patch, snapshot: Option<SnapshotView>) -> Self {
        Self { patch, snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_sentinel_is_recognized() {
        let patch = Patch {
            message_id: Some(BROADCAST_MESSAGE_ID.to_string()),
            ..Default::default()
        };
        assert!(patch.is_broadcast());
    }

    #[test]
    fn patch_round_trips_through_json() {
        let patch = Patch {
            message_id: Some("m1".to_string()),
            content_delta: "chunk".to_string(),
            title: Some("标题".to_string()),
            finished: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        let back: Patch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_id.as_deref(), Some("m1"));
        assert_eq!(back.content_delta, "chunk");
        assert_eq!(back.title.as_deref(), Some("标题"));
        assert!(back.finished);
        assert!(!back.rollback);
    }

    #[test]
    fn absent_optional_fields_deserialize_to_none() {
        let patch: Patch = serde_json::from_str(r#"{"content_delta":"x"}"#).unwrap();
        assert!(patch.message_id.is_none());
        assert!(patch.role.is_none());
        assert!(patch.visible_node_ids.is_none());
    }
}
