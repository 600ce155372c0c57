use std::future::Future;
use std::sync::Arc;

use agent_llm::LlmClient;
use agent_retry::{RetryEngine, RetryStats};
use message_bus::{Message, MessageBus, Patch, PatchSink, Role};
use research_tree::{ActionResult, NodeKind, ResearchTree, TreeError};

use crate::error::AgentError;
use crate::validators::XmlResponse;
use crate::xml::{self, XmlError};

/// Environment strings shared by every prompt template.
#[derive(Debug, Clone)]
pub struct EnvironmentInfo {
    pub tree_text: String,
    pub problem_detail: String,
    pub root_problem: String,
    pub ancestor_solutions: String,
    pub sibling_solutions: String,
    pub descendant_solutions: String,
    pub user_prompt: String,
}

impl EnvironmentInfo {
    pub fn vars(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("current_research_tree_full_text", &self.tree_text),
            ("current_research_problem", &self.problem_detail),
            ("root_problem", &self.root_problem),
            (
                "expert_solutions_of_all_ancestor_problems",
                &self.ancestor_solutions,
            ),
            (
                "other_solutions_of_current_problem",
                &self.sibling_solutions,
            ),
            (
                "expert_solutions_of_all_descendant_problems",
                &self.descendant_solutions,
            ),
            ("user_prompt", &self.user_prompt),
        ]
    }
}

/// Shared machinery behind every agent: the LLM-parse-validate pipeline with
/// retry and rollback, action execution with message framing, and the
/// environment-info gathering the prompt templates consume.
pub struct AgentRuntime {
    name: String,
    bus: Arc<MessageBus>,
    tree: Arc<ResearchTree>,
    llm: Arc<dyn LlmClient>,
    retry: RetryEngine,
}

impl AgentRuntime {
    pub fn new(
        name: impl Into<String>,
        bus: Arc<MessageBus>,
        tree: Arc<ResearchTree>,
        llm: Arc<dyn LlmClient>,
        retry: RetryEngine,
    ) -> Self {
        Self {
            name: name.into(),
            bus,
            tree,
            llm,
            retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn tree(&self) -> &Arc<ResearchTree> {
        &self.tree
    }

    pub async fn retry_stats(&self) -> RetryStats {
        self.retry.stats().await
    }

    /// Open a fresh assistant message and return its id.
    async fn start_assistant_message(
        &self,
        title: &str,
        publisher: &str,
        visible_node_ids: Vec<String>,
    ) -> Result<String, AgentError> {
        let id = self
            .bus
            .publish_patch(Patch {
                role: Some(Role::Assistant),
                publisher: Some(publisher.to_string()),
                title: Some(title.to_string()),
                visible_node_ids: Some(visible_node_ids),
                ..Default::default()
            })
            .await?;
        Ok(id)
    }

    /// Stream a completion into a fresh assistant message and return the raw
    /// content. Retries wrap the stream call; the rollback target is the
    /// message itself.
    pub async fn call_llm_raw(
        &self,
        prompt: &str,
        title: &str,
        publisher: &str,
        visible_node_ids: Vec<String>,
    ) -> Result<String, AgentError> {
        let message_id = self
            .start_assistant_message(title, publisher, visible_node_ids)
            .await?;
        let sink: &dyn PatchSink = self.bus.as_ref();

        self.retry
            .execute_with_retry(sink, Some(&message_id), || {
                let message_id = message_id.clone();
                async move {
                    self.llm
                        .stream_generate(prompt, &message_id, true, sink)
                        .await
                        .map_err(AgentError::from)
                }
            })
            .await
    }

    /// The call-LLM-parse-validate pipeline. Content streaming is
    /// suppressed; once the `<response>` fragment validates, a single
    /// replacement patch carries the response's own rendering. Parse and
    /// validation failures re-enter the retry loop, rolling the message back
    /// so the next attempt streams into a clean slate.
    pub async fn call_llm_validated<T: XmlResponse>(
        &self,
        prompt: &str,
        title: &str,
        publisher: &str,
        visible_node_ids: Vec<String>,
    ) -> Result<T, AgentError> {
        let message_id = self
            .start_assistant_message(title, publisher, visible_node_ids)
            .await?;
        let sink: &dyn PatchSink = self.bus.as_ref();

        self.retry
            .execute_with_retry(sink, Some(&message_id), || {
                let message_id = message_id.clone();
                async move {
                    let content = self
                        .llm
                        .stream_generate(prompt, &message_id, false, sink)
                        .await?;
                    let fragment = xml::extract_fragment(&content, "response")
                        .ok_or_else(|| XmlError::MissingFragment("response".to_string()))?;
                    let value = xml::parse_fragment(&fragment)?;
                    let parsed = T::from_xml(&value)?;

                    self.bus
                        .publish_patch(Patch {
                            message_id: Some(message_id),
                            content_delta: parsed.to_content(),
                            ..Default::default()
                        })
                        .await?;
                    Ok(parsed)
                }
            })
            .await
    }

    /// Run a store command bracketed by assistant messages: an opening
    /// "正在进行" message, then either the completion patch carrying the
    /// action result or a failure patch followed by the error.
    pub async fn execute_action<F>(
        &self,
        action_name: &str,
        publisher: &str,
        action: F,
    ) -> Result<ActionResult, AgentError>
    where
        F: Future<Output = Result<ActionResult, TreeError>>,
    {
        let message_id = self
            .bus
            .publish_patch(Patch {
                role: Some(Role::Assistant),
                publisher: Some(publisher.to_string()),
                title: Some(format!("正在进行 {action_name}")),
                ..Default::default()
            })
            .await?;
        log::info!("[{}] executing action {}", self.name, action_name);

        match action.await {
            Ok(result) => {
                let action_params = result.data.as_object().cloned().unwrap_or_default();
                self.bus
                    .publish_patch(Patch {
                        message_id: Some(message_id),
                        title: Some(format!("{action_name} 已成功完成")),
                        action_title: Some(action_name.to_string()),
                        action_params: Some(action_params),
                        snapshot_id: Some(result.snapshot_id.clone()),
                        content_delta: format!("\n执行结果: {}\n", result.message),
                        finished: true,
                        ..Default::default()
                    })
                    .await?;
                Ok(result)
            }
            Err(error) => {
                log::error!("[{}] action {} failed: {}", self.name, action_name, error);
                self.bus
                    .publish_patch(Patch {
                        message_id: Some(message_id),
                        title: Some(format!("{action_name} 执行失败")),
                        content_delta: format!("执行失败: {error}\n"),
                        finished: true,
                        ..Default::default()
                    })
                    .await?;
                Err(error.into())
            }
        }
    }

    /// Publish a terminal failure notice for the running task.
    pub async fn publish_error(&self, error_message: &str) {
        let patch = Patch {
            role: Some(Role::Assistant),
            title: Some("处理失败".to_string()),
            content_delta: format!("错误: {error_message}"),
            finished: true,
            ..Default::default()
        };
        if let Err(error) = self.bus.publish_patch(patch).await {
            log::warn!("[{}] failed to publish error notice: {}", self.name, error);
        }
    }

    /// The mapping every prompt template draws from.
    pub async fn environment_info(
        &self,
        problem_id: &str,
        user_requirement: Option<&str>,
    ) -> Result<EnvironmentInfo, AgentError> {
        let tree_text = {
            let text = self.tree.compact_text_tree().await;
            if text.is_empty() {
                "研究树为空".to_string()
            } else {
                text
            }
        };
        let problem_detail = self.tree.problem_detail(problem_id).await?;
        let root_id = self.tree.root_problem_id(problem_id).await?;
        let root_problem = self.tree.problem_detail(&root_id).await?;
        let related = self.tree.related_solutions(problem_id).await?;

        Ok(EnvironmentInfo {
            tree_text,
            problem_detail,
            root_problem,
            ancestor_solutions: self
                .solution_details(&related.ancestors, "无上级专家解决方案")
                .await,
            sibling_solutions: self
                .solution_details(&related.siblings, "无其他解决方案")
                .await,
            descendant_solutions: self
                .solution_details(&related.descendants, "无后代解决方案")
                .await,
            user_prompt: user_requirement.unwrap_or("无要求").to_string(),
        })
    }

    async fn solution_details(&self, ids: &[String], fallback: &str) -> String {
        if ids.is_empty() {
            return fallback.to_string();
        }
        let mut details = Vec::with_capacity(ids.len());
        for id in ids {
            match self.tree.solution_detail(id).await {
                Ok(detail) => details.push(detail),
                Err(error) => log::warn!("[{}] skipping solution {id}: {error}", self.name),
            }
        }
        details.join("\n")
    }

    /// The numbered listing of messages visible from a node, as embedded in
    /// chat prompts.
    pub async fn visible_messages_text(
        &self,
        node_id: &str,
        kind: NodeKind,
    ) -> Result<String, AgentError> {
        let problem_id = match kind {
            NodeKind::Solution => self.tree.parent_node_id(node_id).await?,
            NodeKind::Problem => node_id.to_string(),
        };
        let parent = match kind {
            NodeKind::Solution => Some(problem_id.as_str()),
            NodeKind::Problem => None,
        };
        let messages = self.bus.visible_messages(node_id, parent).await;

        let mut blocks = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let publisher = self.describe_publisher(message, &problem_id).await;
            blocks.push(format!(
                "[{}] 【发出者】:{}\n    【消息标题】:{}\n    【消息内容】\n{}",
                index + 1,
                publisher,
                message.title,
                message.content
            ));
        }

        let border = "=".repeat(60);
        let divider = format!("{}\n", "-".repeat(60));
        Ok(format!(
            "{}\n{}\n{}",
            border,
            blocks.join(divider.as_str()),
            border
        ))
    }

    async fn describe_publisher(&self, message: &Message, problem_id: &str) -> String {
        if message.role == Role::User {
            return "用户".to_string();
        }
        let Some(publisher_id) = message.publisher.clone() else {
            return "系统消息".to_string();
        };
        let Ok(summary) = self.tree.node_summary(&publisher_id).await else {
            return "系统消息".to_string();
        };

        // A solution publisher speaks for its parent problem's expert.
        let (expert_problem_id, title) = if summary.kind == NodeKind::Solution {
            match self.tree.parent_node_id(&publisher_id).await {
                Ok(parent_id) => match self.tree.node_summary(&parent_id).await {
                    Ok(parent) => (parent_id, parent.title),
                    Err(_) => (publisher_id, summary.title),
                },
                Err(_) => (publisher_id, summary.title),
            }
        } else {
            (publisher_id, summary.title)
        };

        if expert_problem_id == problem_id {
            format!("“{title}”问题的负责专家（你）")
        } else {
            format!("“{title}”问题的负责专家")
        }
    }
}
