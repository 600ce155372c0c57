use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use message_bus::{Patch, PatchSink, Role, SnapshotProvider, SnapshotView};

use crate::error::TreeError;
use crate::node::NodeKind;
use crate::request::{ProblemRequest, SolutionRequest};
use crate::snapshot::Snapshot;
use crate::store::{NodeSummary, RelatedSolutions, ResearchTreeStore};

/// Result of a mutating command, as returned to HTTP callers and attached to
/// the synthesized action message.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub snapshot_id: String,
    pub data: Value,
}

/// Shared handle over the snapshot store. Commands run under a write lock
/// and go through one uniform wrapper that commits, packages the result and
/// emits the user-visible action message; queries run under a read lock and
/// return owned data.
pub struct ResearchTree {
    inner: RwLock<ResearchTreeStore>,
}

impl ResearchTree {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ResearchTreeStore::new()),
        }
    }

    /// Every command funnels through here: run the mutation, package
    /// `{success, message, snapshot_id, data}`, then synthesize a user-role
    /// action message. Failures publish the failure notice and propagate.
    async fn run_action<F>(
        &self,
        action: &str,
        params: Map<String, Value>,
        publish: Option<&dyn PatchSink>,
        op: F,
    ) -> Result<ActionResult, TreeError>
    where
        F: FnOnce(&mut ResearchTreeStore) -> Result<Snapshot, TreeError>,
    {
        let outcome = {
            let mut store = self.inner.write().await;
            op(&mut store)
        };

        match outcome {
            Ok(snapshot) => {
                let result = ActionResult {
                    success: true,
                    message: format!("操作成功: {action}"),
                    snapshot_id: snapshot.id.clone(),
                    data: serde_json::to_value(&snapshot).unwrap_or(Value::Null),
                };
                if let Some(sink) = publish {
                    self.publish_action_message(sink, action, params, &result)
                        .await;
                }
                Ok(result)
            }
            Err(error) => {
                log::error!("[tree] {action} failed: {error}");
                if let Some(sink) = publish {
                    let result = ActionResult {
                        success: false,
                        message: format!("操作失败: {error}"),
                        snapshot_id: String::new(),
                        data: Value::Object(Map::new()),
                    };
                    self.publish_action_message(sink, action, params, &result)
                        .await;
                }
                Err(error)
            }
        }
    }

    async fn publish_action_message(
        &self,
        sink: &dyn PatchSink,
        action: &str,
        params: Map<String, Value>,
        result: &ActionResult,
    ) {
        let title = if result.success {
            format!("操作成功: {action}")
        } else {
            format!("操作失败: {action}")
        };
        let params_text =
            serde_json::to_string(&Value::Object(params.clone())).unwrap_or_default();
        let content = format!(
            "操作类型: {action}\n参数: {params_text}\n结果: {}",
            result.message
        );
        let patch = Patch {
            role: Some(Role::User),
            title: Some(title),
            content_delta: content,
            action_title: Some(action.to_string()),
            action_params: Some(params),
            snapshot_id: Some(result.snapshot_id.clone()),
            visible_node_ids: Some(Vec::new()),
            finished: true,
            ..Default::default()
        };
        // An unpublishable action message must not undo a committed action.
        if let Err(error) = sink.publish(patch).await {
            log::warn!("[tree] failed to publish action message for {action}: {error}");
        }
    }

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // ---------------- commands ----------------

    pub async fn add_root_problem(
        &self,
        request: &ProblemRequest,
        publish: Option<&dyn PatchSink>,
    ) -> Result<ActionResult, TreeError> {
        let params = Self::params(&[(
            "new_problem",
            serde_json::to_value(request).unwrap_or(Value::Null),
        )]);
        self.run_action("add_root_problem", params, publish, |store| {
            store.add_root_problem(request)
        })
        .await
    }

    pub async fn update_root_problem(
        &self,
        problem_id: &str,
        request: &ProblemRequest,
        publish: Option<&dyn PatchSink>,
    ) -> Result<ActionResult, TreeError> {
        let params = Self::params(&[
            ("problem_id", Value::String(problem_id.to_string())),
            (
                "new_problem",
                serde_json::to_value(request).unwrap_or(Value::Null),
            ),
        ]);
        self.run_action("update_root_problem", params, publish, |store| {
            store.update_root_problem(problem_id, request)
        })
        .await
    }

    pub async fn delete_root_problem(
        &self,
        problem_id: &str,
        publish: Option<&dyn PatchSink>,
    ) -> Result<ActionResult, TreeError> {
        let params = Self::params(&[("problem_id", Value::String(problem_id.to_string()))]);
        self.run_action("delete_root_problem", params, publish, |store| {
            store.delete_root_problem(problem_id)
        })
        .await
    }

    pub async fn create_solution(
        &self,
        problem_id: &str,
        request: &SolutionRequest,
        publish: Option<&dyn PatchSink>,
    ) -> Result<ActionResult, TreeError> {
        let params = Self::params(&[
            ("problem_id", Value::String(problem_id.to_string())),
            (
                "new_solution",
                serde_json::to_value(request).unwrap_or(Value::Null),
            ),
        ]);
        self.run_action("create_solution", params, publish, |store| {
            store.create_solution(problem_id, request)
        })
        .await
    }

    pub async fn update_solution(
        &self,
        solution_id: &str,
        request: &SolutionRequest,
        publish: Option<&dyn PatchSink>,
    ) -> Result<ActionResult, TreeError> {
        let params = Self::params(&[
            ("solution_id", Value::String(solution_id.to_string())),
            (
                "new_solution",
                serde_json::to_value(request).unwrap_or(Value::Null),
            ),
        ]);
        self.run_action("update_solution", params, publish, |store| {
            store.update_solution(solution_id, request)
        })
        .await
    }

    pub async fn delete_solution(
        &self,
        solution_id: &str,
        publish: Option<&dyn PatchSink>,
    ) -> Result<ActionResult, TreeError> {
        let params = Self::params(&[("solution_id", Value::String(solution_id.to_string()))]);
        self.run_action("delete_solution", params, publish, |store| {
            store.delete_solution(solution_id)
        })
        .await
    }

    pub async fn set_selected_solution(
        &self,
        problem_id: &str,
        solution_id: Option<&str>,
        publish: Option<&dyn PatchSink>,
    ) -> Result<ActionResult, TreeError> {
        let params = Self::params(&[
            ("problem_id", Value::String(problem_id.to_string())),
            (
                "solution_id",
                solution_id
                    .map(|s| Value::String(s.to_string()))
                    .unwrap_or(Value::Null),
            ),
        ]);
        self.run_action("set_selected_solution", params, publish, |store| {
            store.set_selected_solution(problem_id, solution_id)
        })
        .await
    }

    pub async fn update_problem(
        &self,
        problem_id: &str,
        request: &ProblemRequest,
        publish: Option<&dyn PatchSink>,
    ) -> Result<ActionResult, TreeError> {
        let params = Self::params(&[
            ("problem_id", Value::String(problem_id.to_string())),
            (
                "new_problem",
                serde_json::to_value(request).unwrap_or(Value::Null),
            ),
        ]);
        self.run_action("update_problem", params, publish, |store| {
            store.update_problem(problem_id, request)
        })
        .await
    }

    // ---------------- queries ----------------

    pub async fn current_snapshot_id(&self) -> String {
        self.inner.read().await.current_snapshot_id().to_string()
    }

    pub async fn current_snapshot(&self) -> Snapshot {
        self.inner.read().await.current().clone()
    }

    pub async fn snapshot(&self, snapshot_id: &str) -> Option<Snapshot> {
        self.inner.read().await.snapshot(snapshot_id).cloned()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.inner.read().await.snapshot_count()
    }

    pub async fn restore_snapshot(&self, snapshot_id: &str) -> Result<(), TreeError> {
        self.inner.write().await.restore_snapshot(snapshot_id)
    }

    pub async fn node_summary(&self, node_id: &str) -> Result<NodeSummary, TreeError> {
        self.inner.read().await.node_summary(node_id)
    }

    pub async fn parent_node_id(&self, node_id: &str) -> Result<String, TreeError> {
        self.inner.read().await.parent_node_id(node_id)
    }

    pub async fn root_problem_id(&self, node_id: &str) -> Result<String, TreeError> {
        self.inner.read().await.root_problem_id(node_id)
    }

    pub async fn node_children_ids(
        &self,
        node_id: &str,
        only_implementation: bool,
    ) -> Result<Vec<String>, TreeError> {
        self.inner
            .read()
            .await
            .node_children_ids(node_id, only_implementation)
    }

    pub async fn selected_solution_id(
        &self,
        problem_id: &str,
    ) -> Result<Option<String>, TreeError> {
        self.inner.read().await.selected_solution_id(problem_id)
    }

    pub async fn node_id_by_title(&self, title: &str, kind: Option<NodeKind>) -> Option<String> {
        self.inner.read().await.node_id_by_title(title, kind)
    }

    pub async fn compact_text_tree(&self) -> String {
        self.inner.read().await.compact_text_tree()
    }

    pub async fn problem_detail(&self, problem_id: &str) -> Result<String, TreeError> {
        self.inner.read().await.problem_detail(problem_id)
    }

    pub async fn solution_detail(&self, solution_id: &str) -> Result<String, TreeError> {
        self.inner.read().await.solution_detail(solution_id)
    }

    pub async fn related_solutions(
        &self,
        problem_id: &str,
    ) -> Result<RelatedSolutions, TreeError> {
        self.inner.read().await.related_solutions(problem_id)
    }

    pub async fn solution_children_requests(
        &self,
        solution_id: &str,
    ) -> Result<Vec<ProblemRequest>, TreeError> {
        self.inner
            .read()
            .await
            .solution_children_requests(solution_id)
    }

    // ---------------- persistence ----------------

    pub async fn export(&self) -> (HashMap<String, Snapshot>, String) {
        self.inner.read().await.export()
    }

    pub async fn import(
        &self,
        snapshot_map: HashMap<String, Snapshot>,
        current_snapshot_id: String,
    ) -> Result<(), TreeError> {
        self.inner
            .write()
            .await
            .import(snapshot_map, current_snapshot_id)
    }

    pub async fn reset(&self) {
        self.inner.write().await.reset();
    }
}

impl Default for ResearchTree {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotProvider for ResearchTree {
    async fn snapshot_view(&self, snapshot_id: &str) -> Option<SnapshotView> {
        let store = self.inner.read().await;
        let snapshot = store.snapshot(snapshot_id)?;
        Some(SnapshotView {
            id: snapshot.id.clone(),
            created_at: snapshot.created_at,
            data: serde_json::to_value(snapshot).ok()?,
            summary: format!("包含{}个根问题", snapshot.roots.len()),
        })
    }
}
