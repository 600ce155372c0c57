use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use message_bus::{Patch, Role, BROADCAST_MESSAGE_ID};

use crate::error::AgentError;
use crate::runtime::AgentRuntime;

/// Extra parameters carried by a user message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentParams {
    #[serde(default)]
    pub problem_id: Option<String>,
    #[serde(default)]
    pub solution_id: Option<String>,
}

/// Outcome of the last user-triggered run. A user interruption is a clean
/// end, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl TaskResult {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
            error: None,
            error_type: None,
        }
    }

    pub fn failure(error: &AgentError) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(error.to_string()),
            error_type: Some(error.kind().to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// One concrete agent behavior, driven by [`AgentHandle`].
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, content: String, params: AgentParams) -> Result<(), AgentError>;
}

struct RunningTask {
    join: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns the lifecycle of an agent's single user-triggered task: publishes
/// the opening user message, supervises the run with cooperative
/// cancellation, records the last task result and always closes with the
/// broadcast `finished` patch.
pub struct AgentHandle {
    name: String,
    runtime: Arc<AgentRuntime>,
    agent: Arc<dyn Agent>,
    running: Mutex<Option<RunningTask>>,
    last_task_result: Arc<Mutex<Option<TaskResult>>>,
}

impl AgentHandle {
    pub fn new(name: impl Into<String>, runtime: Arc<AgentRuntime>, agent: Arc<dyn Agent>) -> Self {
        Self {
            name: name.into(),
            runtime,
            agent,
            running: Mutex::new(None),
            last_task_result: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    pub async fn is_processing(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|task| !task.join.is_finished())
            .unwrap_or(false)
    }

    pub async fn last_task_result(&self) -> Option<TaskResult> {
        self.last_task_result.lock().await.clone()
    }

    /// Publish the user's message and spawn the agent task in the
    /// background. Refuses while a previous task is still running.
    pub async fn process_user_message(
        &self,
        content: &str,
        title: &str,
        params: AgentParams,
    ) -> Result<(), AgentError> {
        let mut running = self.running.lock().await;
        if running
            .as_ref()
            .map(|task| !task.join.is_finished())
            .unwrap_or(false)
        {
            return Err(AgentError::Busy);
        }

        let mut visible_node_ids = Vec::new();
        if let Some(problem_id) = &params.problem_id {
            visible_node_ids.push(problem_id.clone());
        }
        if let Some(solution_id) = &params.solution_id {
            visible_node_ids.push(solution_id.clone());
        }

        self.runtime
            .bus()
            .publish_patch(Patch {
                role: Some(Role::User),
                title: Some(title.to_string()),
                content_delta: content.to_string(),
                visible_node_ids: Some(visible_node_ids),
                finished: true,
                ..Default::default()
            })
            .await?;

        let cancel = CancellationToken::new();
        let join = tokio::spawn(Self::supervise(
            self.name.clone(),
            self.runtime.clone(),
            self.agent.clone(),
            self.last_task_result.clone(),
            cancel.clone(),
            content.to_string(),
            params,
        ));
        *running = Some(RunningTask { join, cancel });
        log::info!("[{}] agent task started", self.name);
        Ok(())
    }

    /// Supervisor wrapped around the agent future. Dropping the future at a
    /// cancellation request abandons whatever it was awaiting, including
    /// in-flight LLM streams; the terminal patch is published in every
    /// outcome.
    async fn supervise(
        name: String,
        runtime: Arc<AgentRuntime>,
        agent: Arc<dyn Agent>,
        last_task_result: Arc<Mutex<Option<TaskResult>>>,
        cancel: CancellationToken,
        content: String,
        params: AgentParams,
    ) {
        let outcome = tokio::select! {
            result = agent.run(content, params) => Some(result),
            _ = cancel.cancelled() => None,
        };

        let result = match outcome {
            Some(Ok(())) => TaskResult::success(),
            Some(Err(error)) => {
                log::error!("[{name}] agent task failed: {error}");
                TaskResult::failure(&error)
            }
            None => {
                log::info!("[{name}] agent task cancelled");
                let interrupt = Patch {
                    message_id: Some(BROADCAST_MESSAGE_ID.to_string()),
                    content_delta: "\n【用户中断】".to_string(),
                    finished: true,
                    ..Default::default()
                };
                if let Err(error) = runtime.bus().publish_patch(interrupt).await {
                    log::warn!("[{name}] failed to publish interrupt patch: {error}");
                }
                TaskResult::success()
            }
        };
        *last_task_result.lock().await = Some(result);

        let terminal = Patch {
            role: Some(Role::Assistant),
            visible_node_ids: Some(vec![BROADCAST_MESSAGE_ID.to_string()]),
            title: Some("任务已完成".to_string()),
            content_delta: "任务已完成\n".to_string(),
            action_title: Some("finished".to_string()),
            finished: true,
            ..Default::default()
        };
        if let Err(error) = runtime.bus().publish_patch(terminal).await {
            log::error!("[{name}] failed to publish terminal patch: {error}");
        }
    }

    /// Cancel the running task, wait for it to unwind, and notify the user.
    /// Returns whether a task was actually stopped.
    pub async fn stop_processing(&self) -> bool {
        let task = self.running.lock().await.take();
        let Some(task) = task else {
            return false;
        };
        if task.join.is_finished() {
            return false;
        }

        task.cancel.cancel();
        if let Err(error) = task.join.await {
            log::error!("[{}] agent task join failed: {}", self.name, error);
        }

        let stop_patch = Patch {
            role: Some(Role::Assistant),
            title: Some("任务已中断".to_string()),
            content_delta: "用户取消了当前任务\n".to_string(),
            finished: true,
            ..Default::default()
        };
        if let Err(error) = self.runtime.bus().publish_patch(stop_patch).await {
            log::warn!("[{}] failed to publish stop patch: {}", self.name, error);
        }
        log::info!("[{}] agent task stopped", self.name);
        true
    }
}
