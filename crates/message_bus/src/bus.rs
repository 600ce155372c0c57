use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use crate::error::BusError;
use crate::message::{FrontendMessage, Message, MessageStatus};
use crate::patch::{FrontendPatch, Patch};
use crate::sink::{PatchSink, SnapshotProvider};

/// Bound of each subscriber queue. A subscriber that falls this far behind
/// starts losing patches instead of stalling the writer.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

struct BusInner {
    messages: HashMap<String, Message>,
    order: Vec<String>,
    subscribers: Vec<mpsc::Sender<FrontendPatch>>,
}

impl BusInner {
    fn generating_message_id(&self) -> Option<String> {
        self.order
            .iter()
            .find(|id| {
                self.messages
                    .get(*id)
                    .map(Message::is_generating)
                    .unwrap_or(false)
            })
            .cloned()
    }

    fn last_message_id(&self) -> String {
        self.order.last().cloned().unwrap_or_default()
    }
}

/// The canonical message log. All mutation goes through [`MessageBus::publish_patch`];
/// the log state and the subscriber list live behind a single lock so that a
/// patch is applied and fanned out atomically, in publish order.
pub struct MessageBus {
    inner: Mutex<BusInner>,
    snapshots: Option<Arc<dyn SnapshotProvider>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                messages: HashMap::new(),
                order: Vec::new(),
                subscribers: Vec::new(),
            }),
            snapshots: None,
        }
    }

    pub fn with_snapshot_provider(provider: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            snapshots: Some(provider),
            ..Self::new()
        }
    }

    /// Apply a patch to the log and fan it out.
    ///
    /// Dispatch, in order:
    /// 1. terminal `action_title == "finished"` patches are broadcast without
    ///    touching the log;
    /// 2. `rollback` erases everything after the target and resets it;
    /// 3. `message_id == None` creates a new message (`role` required; refused
    ///    while another message would be left generating alongside it);
    /// 4. the `"-"` sentinel updates every generating message;
    /// 5. anything else updates the addressed message.
    ///
    /// Returns the id of the affected message (after a rollback, the new last
    /// id of the log).
    pub async fn publish_patch(&self, mut patch: Patch) -> Result<String, BusError> {
        let mut inner = self.inner.lock().await;

        if patch.is_terminal() {
            self.distribute(&mut inner, &patch).await;
            return Ok(inner.last_message_id());
        }

        if patch.rollback {
            let Some(target_id) = patch.message_id.clone() else {
                return Err(BusError::RollbackWithoutTarget);
            };
            return self.handle_rollback(&mut inner, patch, &target_id).await;
        }

        match patch.message_id.clone() {
            None => {
                if let Some(generating) = inner.generating_message_id() {
                    // A patch that completes its message on arrival never
                    // leaves two messages generating, so it may pass.
                    if !patch.finished {
                        return Err(BusError::GenerationInProgress(generating));
                    }
                }
                let Some(role) = patch.role else {
                    return Err(BusError::MissingRole);
                };

                let mut message = Message::new(role);
                patch.message_id = Some(message.id.clone());
                message.apply(&patch);
                let id = message.id.clone();
                inner.messages.insert(id.clone(), message);
                inner.order.push(id.clone());
                self.distribute(&mut inner, &patch).await;
                log::info!("[bus] created message {} ({:?})", id, role);
                Ok(id)
            }
            Some(_) if patch.is_broadcast() => {
                let generating: Vec<String> = inner
                    .order
                    .iter()
                    .filter(|mid| {
                        inner
                            .messages
                            .get(*mid)
                            .map(Message::is_generating)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                for mid in generating {
                    if let Some(message) = inner.messages.get_mut(&mid) {
                        message.apply(&patch);
                    }
                }
                self.distribute(&mut inner, &patch).await;
                Ok(inner.last_message_id())
            }
            Some(id) => {
                let Some(message) = inner.messages.get_mut(&id) else {
                    return Err(BusError::MessageNotFound(id));
                };
                message.apply(&patch);
                self.distribute(&mut inner, &patch).await;
                Ok(id)
            }
        }
    }

    async fn handle_rollback(
        &self,
        inner: &mut BusInner,
        patch: Patch,
        target_id: &str,
    ) -> Result<String, BusError> {
        let Some(index) = inner.order.iter().position(|id| id == target_id) else {
            log::warn!("[bus] rollback target not found: {}", target_id);
            return Ok(inner.last_message_id());
        };

        let removed: Vec<String> = inner.order.split_off(index + 1);
        for id in &removed {
            inner.messages.remove(id);
        }
        if let Some(target) = inner.messages.get_mut(target_id) {
            target.status = MessageStatus::Generating;
            target.thinking.clear();
            target.content.clear();
            target.updated_at = Utc::now();
        }
        self.distribute(inner, &patch).await;
        log::info!(
            "[bus] rollback to {}: removed {} messages",
            target_id,
            removed.len()
        );
        Ok(inner.last_message_id())
    }

    /// Fan a patch out to every subscriber, never blocking on a slow one.
    /// Snapshot ids are expanded to snapshot objects before delivery.
    async fn distribute(&self, inner: &mut BusInner, patch: &Patch) {
        let snapshot = match (&self.snapshots, patch.snapshot_id.as_deref()) {
            (Some(provider), Some(id)) if !id.is_empty() => provider.snapshot_view(id).await,
            _ => None,
        };
        let frontend = FrontendPatch::new(patch.clone(), snapshot);

        inner.subscribers.retain(|tx| {
            match tx.try_send(frontend.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("[bus] subscriber queue full, dropping patch");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Register a new subscriber. The returned receiver sees every patch
    /// published after this call, in publish order.
    pub async fn subscribe(&self) -> PatchReceiver {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let mut inner = self.inner.lock().await;
        inner.subscribers.push(tx);
        PatchReceiver { rx }
    }

    /// Atomically snapshot a message and register a subscriber, so that the
    /// caller sees the accumulated state exactly once and every later patch
    /// exactly once. Used by the resume endpoint.
    pub async fn subscribe_with_message(&self, message_id: &str) -> Option<(Message, PatchReceiver)> {
        let mut inner = self.inner.lock().await;
        let message = inner.messages.get(message_id)?.clone();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        inner.subscribers.push(tx);
        Some((message, PatchReceiver { rx }))
    }

    pub async fn message(&self, message_id: &str) -> Option<Message> {
        self.inner.lock().await.messages.get(message_id).cloned()
    }

    pub async fn incomplete_message_id(&self) -> Option<String> {
        self.inner.lock().await.generating_message_id()
    }

    pub async fn last_message_id(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.order.last().cloned()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    /// Ordered history with snapshot ids projected to snapshot objects.
    pub async fn history(&self) -> Vec<FrontendMessage> {
        let messages: Vec<Message> = {
            let inner = self.inner.lock().await;
            inner
                .order
                .iter()
                .filter_map(|id| inner.messages.get(id).cloned())
                .collect()
        };
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            let snapshot = match &self.snapshots {
                Some(provider) if !message.snapshot_id.is_empty() => {
                    provider.snapshot_view(&message.snapshot_id).await
                }
                _ => None,
            };
            out.push(FrontendMessage::new(message, snapshot));
        }
        out
    }

    /// Messages visible from a node's point of view: globally visible ones,
    /// those addressed to the node, and (for solution nodes) those addressed
    /// to the parent problem, whose id the caller resolves.
    pub async fn visible_messages(
        &self,
        node_id: &str,
        parent_problem_id: Option<&str>,
    ) -> Vec<Message> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|message| {
                message.visible_node_ids.is_empty()
                    || message.visible_node_ids.iter().any(|v| v == node_id)
                    || parent_problem_id
                        .map(|pid| message.visible_node_ids.iter().any(|v| v == pid))
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// User-initiated history truncation: erase every message strictly after
    /// the target, leaving the target itself untouched. Returns the number of
    /// erased messages.
    pub async fn truncate_after(&self, message_id: &str) -> Result<usize, BusError> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.order.iter().position(|id| id == message_id) else {
            return Err(BusError::MessageNotFound(message_id.to_string()));
        };
        let removed: Vec<String> = inner.order.split_off(index + 1);
        for id in &removed {
            inner.messages.remove(id);
        }
        Ok(removed.len())
    }

    /// The most recent snapshot id recorded at or before the given message.
    pub async fn snapshot_at_or_before(&self, message_id: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        let index = inner.order.iter().position(|id| id == message_id)?;
        inner.order[..=index]
            .iter()
            .rev()
            .filter_map(|id| inner.messages.get(id))
            .map(|message| message.snapshot_id.clone())
            .find(|snapshot_id| !snapshot_id.is_empty())
    }

    /// Debug dump of the whole log, gated on the debug level.
    pub async fn log_message_history(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let inner = self.inner.lock().await;
        log::debug!("==== message history ({} messages) ====", inner.order.len());
        for id in &inner.order {
            if let Some(message) = inner.messages.get(id) {
                log::debug!(
                    "[{}] role={:?} status={:?} title={} action={} snapshot={} thinking={}B content={}B",
                    message.id,
                    message.role,
                    message.status,
                    message.title,
                    message.action_title,
                    message.snapshot_id,
                    message.thinking.len(),
                    message.content.len(),
                );
            }
        }
    }

    /// Raw log state for project persistence.
    pub async fn export(&self) -> (HashMap<String, Message>, Vec<String>) {
        let inner = self.inner.lock().await;
        (inner.messages.clone(), inner.order.clone())
    }

    /// Replace the log state from a loaded project. Subscribers are kept.
    pub async fn import(&self, messages: HashMap<String, Message>, order: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.messages = messages;
        inner.order = order;
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.messages.clear();
        inner.order.clear();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PatchSink for MessageBus {
    async fn publish(&self, patch: Patch) -> Result<String, BusError> {
        self.publish_patch(patch).await
    }
}

/// Receiving half of a subscription; dropped on disconnect, at which point
/// the bus prunes the sending half.
pub struct PatchReceiver {
    rx: mpsc::Receiver<FrontendPatch>,
}

impl PatchReceiver {
    pub async fn next(&mut self) -> Option<FrontendPatch> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<FrontendPatch> {
        self.rx.try_recv().ok()
    }
}
