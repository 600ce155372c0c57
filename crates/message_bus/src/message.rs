use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::patch::Patch;
use crate::sink::SnapshotView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Generating,
    Completed,
}

/// A single entry of the canonical message log.
///
/// `thinking` and `content` are cumulative: patches only ever append to them.
/// Every other mutable field is replaced wholesale by the patch that carries
/// it. An empty `visible_node_ids` means the message is globally visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub publisher: Option<String>,
    pub status: MessageStatus,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thinking: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub action_title: String,
    #[serde(default)]
    pub action_params: Map<String, Value>,
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub visible_node_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        let now = Utc::now();
        let status = match role {
            // User messages arrive complete; assistant messages start streaming.
            Role::User => MessageStatus::Completed,
            Role::Assistant => MessageStatus::Generating,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            publisher: None,
            status,
            title: String::new(),
            thinking: String::new(),
            content: String::new(),
            action_title: String::new(),
            action_params: Map::new(),
            snapshot_id: String::new(),
            visible_node_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.status == MessageStatus::Generating
    }

    /// Apply a patch in place. Deltas append, everything else replaces.
    pub fn apply(&mut self, patch: &Patch) {
        if !patch.thinking_delta.is_empty() {
            self.thinking.push_str(&patch.thinking_delta);
        }
        if !patch.content_delta.is_empty() {
            self.content.push_str(&patch.content_delta);
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        if let Some(publisher) = &patch.publisher {
            self.publisher = Some(publisher.clone());
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(action_title) = &patch.action_title {
            self.action_title = action_title.clone();
        }
        if let Some(action_params) = &patch.action_params {
            self.action_params = action_params.clone();
        }
        if let Some(snapshot_id) = &patch.snapshot_id {
            self.snapshot_id = snapshot_id.clone();
        }
        if let Some(visible_node_ids) = &patch.visible_node_ids {
            self.visible_node_ids = visible_node_ids.clone();
        }
        if patch.finished {
            self.status = MessageStatus::Completed;
        }
        self.updated_at = Utc::now();
    }
}

/// Message as delivered to an external consumer: the raw `snapshot_id` is
/// accompanied by the expanded snapshot object when one is known.
#[derive(Debug, Clone, Serialize)]
pub struct FrontendMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotView>,
}

impl FrontendMessage {
    pub fn new(message: Message, snapshot: Option<SnapshotView>) -> Self {
        Self { message, snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_message_is_completed() {
        let message = Message::new(Role::User);
        assert_eq!(message.status, MessageStatus::Completed);
    }

    #[test]
    fn new_assistant_message_is_generating() {
        let message = Message::new(Role::Assistant);
        assert!(message.is_generating());
    }

    #[test]
    fn deltas_append_and_fields_replace() {
        let mut message = Message::new(Role::Assistant);
        message.apply(&Patch {
            thinking_delta: "think ".to_string(),
            content_delta: "hello".to_string(),
            title: Some("first".to_string()),
            ..Default::default()
        });
        message.apply(&Patch {
            thinking_delta: "more".to_string(),
            content_delta: " world".to_string(),
            title: Some("second".to_string()),
            ..Default::default()
        });

        assert_eq!(message.thinking, "think more");
        assert_eq!(message.content, "hello world");
        assert_eq!(message.title, "second");
    }

    #[test]
    fn finished_flag_completes_the_message() {
        let mut message = Message::new(Role::Assistant);
        message.apply(&Patch {
            finished: true,
            ..Default::default()
        });
        assert_eq!(message.status, MessageStatus::Completed);
    }
}
