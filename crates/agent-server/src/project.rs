use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use agent_core::{AgentHandle, AgentRuntime, AutoResearchAgent, UserChatAgent};
use agent_llm::LlmClient;
use agent_retry::RetryEngine;
use message_bus::{BusError, Message, MessageBus, SnapshotProvider};
use research_tree::{ResearchTree, Snapshot, TreeError};

pub const AUTO_RESEARCH_AGENT: &str = "auto_research_agent";
pub const USER_CHAT_AGENT: &str = "user_chat_agent";

const UNNAMED_PROJECT: &str = "未命名";

/// On-disk shape of one project file.
#[derive(Debug, Serialize, Deserialize)]
struct ProjectData {
    project_name: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    messages: HashMap<String, Message>,
    message_order: Vec<String>,
    snapshot_map: HashMap<String, Snapshot>,
    current_snapshot_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub project_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub message_count: usize,
    pub snapshot_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectListEntry {
    pub project_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub success: bool,
    pub message: String,
    pub deleted_count: usize,
    pub target_snapshot_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project not found: {0}")]
    NotFound(String),

    #[error("no current project")]
    NoCurrentProject,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad project file: {0}")]
    Format(#[from] serde_json::Error),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

struct CurrentProject {
    name: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// Owns the shared stores and the agent registry, and maps them to the
/// on-disk project files: one JSON document per project holding the full
/// message log and the whole snapshot history.
pub struct ProjectManager {
    projects_dir: PathBuf,
    tree: Arc<ResearchTree>,
    bus: Arc<MessageBus>,
    agents: HashMap<String, Arc<AgentHandle>>,
    current: Mutex<CurrentProject>,
}

impl ProjectManager {
    pub fn new(projects_dir: impl Into<PathBuf>, llm: Arc<dyn LlmClient>) -> Self {
        let tree = Arc::new(ResearchTree::new());
        let provider: Arc<dyn SnapshotProvider> = tree.clone();
        let bus = Arc::new(MessageBus::with_snapshot_provider(provider));

        let mut agents = HashMap::new();
        let auto_runtime = Arc::new(AgentRuntime::new(
            AUTO_RESEARCH_AGENT,
            bus.clone(),
            tree.clone(),
            llm.clone(),
            RetryEngine::default(),
        ));
        agents.insert(
            AUTO_RESEARCH_AGENT.to_string(),
            Arc::new(AgentHandle::new(
                AUTO_RESEARCH_AGENT,
                auto_runtime.clone(),
                Arc::new(AutoResearchAgent::new(auto_runtime)),
            )),
        );
        let chat_runtime = Arc::new(AgentRuntime::new(
            USER_CHAT_AGENT,
            bus.clone(),
            tree.clone(),
            llm,
            RetryEngine::default(),
        ));
        agents.insert(
            USER_CHAT_AGENT.to_string(),
            Arc::new(AgentHandle::new(
                USER_CHAT_AGENT,
                chat_runtime.clone(),
                Arc::new(UserChatAgent::new(chat_runtime)),
            )),
        );

        Self {
            projects_dir: projects_dir.into(),
            tree,
            bus,
            agents,
            current: Mutex::new(CurrentProject {
                name: None,
                created_at: None,
                updated_at: None,
            }),
        }
    }

    pub fn tree(&self) -> &Arc<ResearchTree> {
        &self.tree
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn agent(&self, name: &str) -> Option<&Arc<AgentHandle>> {
        self.agents.get(name)
    }

    pub fn agents(&self) -> impl Iterator<Item = (&String, &Arc<AgentHandle>)> {
        self.agents.iter()
    }

    /// Restore the most recently saved project, or start a fresh unnamed
    /// one.
    pub async fn auto_restore(&self) {
        match self.find_latest_project().await {
            Some(name) => match self.load_project(&name).await {
                Ok(()) => log::info!("restored project {name}"),
                Err(error) => {
                    log::error!("failed to restore project {name}: {error}");
                    let _ = self.create_new_project(UNNAMED_PROJECT).await;
                }
            },
            None => {
                let _ = self.create_new_project(UNNAMED_PROJECT).await;
                log::info!("created project {UNNAMED_PROJECT}");
            }
        }
    }

    async fn find_latest_project(&self) -> Option<String> {
        let mut entries = tokio::fs::read_dir(&self.projects_dir).await.ok()?;
        let mut latest: Option<(std::time::SystemTime, String)> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if latest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                latest = Some((modified, stem.to_string()));
            }
        }
        latest.map(|(_, name)| name)
    }

    fn project_path(&self, name: &str) -> PathBuf {
        self.projects_dir.join(format!("{name}.json"))
    }

    /// Resolve a save path, suffixing `(1)`, `(2)`… on collision.
    fn conflict_free_path(&self, name: &str) -> (PathBuf, String) {
        let direct = self.project_path(name);
        if !direct.exists() {
            return (direct, name.to_string());
        }
        let mut counter = 1;
        loop {
            let candidate = format!("{name}({counter})");
            let path = self.project_path(&candidate);
            if !path.exists() {
                return (path, candidate);
            }
            counter += 1;
        }
    }

    async fn write_project(&self, path: &Path, name: &str) -> Result<(), ProjectError> {
        let (messages, message_order) = self.bus.export().await;
        let (snapshot_map, current_snapshot_id) = self.tree.export().await;
        let now = Utc::now();

        let data = {
            let mut current = self.current.lock().await;
            current.name = Some(name.to_string());
            current.created_at.get_or_insert(now);
            current.updated_at = Some(now);
            ProjectData {
                project_name: name.to_string(),
                created_at: current.created_at,
                updated_at: current.updated_at,
                messages,
                message_order,
                snapshot_map,
                current_snapshot_id,
            }
        };

        tokio::fs::create_dir_all(&self.projects_dir).await?;
        let json = serde_json::to_string_pretty(&data)?;
        tokio::fs::write(path, json).await?;
        log::info!("saved project to {}", path.display());
        Ok(())
    }

    /// Save under the current name, overwriting in place. Returns the saved
    /// name.
    pub async fn save_current_project(&self) -> Result<String, ProjectError> {
        let name = {
            let current = self.current.lock().await;
            current.name.clone().ok_or(ProjectError::NoCurrentProject)?
        };
        let path = self.project_path(&name);
        self.write_project(&path, &name).await?;
        Ok(name)
    }

    /// Save under a new name; collisions get a numeric suffix. Returns the
    /// actually used name.
    pub async fn save_project_as(&self, new_name: &str) -> Result<String, ProjectError> {
        let (path, actual_name) = self.conflict_free_path(new_name);
        self.write_project(&path, &actual_name).await?;
        Ok(actual_name)
    }

    pub async fn load_project(&self, name: &str) -> Result<(), ProjectError> {
        let path = self.project_path(name);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| ProjectError::NotFound(name.to_string()))?;
        let data: ProjectData = serde_json::from_str(&content)?;

        self.bus.import(data.messages, data.message_order).await;
        self.tree
            .import(data.snapshot_map, data.current_snapshot_id)
            .await?;

        let mut current = self.current.lock().await;
        current.name = Some(name.to_string());
        current.created_at = data.created_at;
        current.updated_at = data.updated_at;
        log::info!("loaded project {name}");
        Ok(())
    }

    /// Start an empty project, auto-saving the previous one when it holds
    /// data.
    pub async fn create_new_project(&self, name: &str) -> Result<(), ProjectError> {
        let has_data =
            self.bus.message_count().await > 0 || self.tree.snapshot_count().await > 1;
        let had_name = self.current.lock().await.name.clone();
        if has_data && had_name.is_some() {
            if let Err(error) = self.save_current_project().await {
                log::warn!("failed to auto-save before project switch: {error}");
            }
        }

        self.bus.clear().await;
        self.tree.reset().await;
        let mut current = self.current.lock().await;
        current.name = Some(name.to_string());
        current.created_at = Some(Utc::now());
        current.updated_at = Some(Utc::now());
        Ok(())
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectListEntry>, ProjectError> {
        let mut projects = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.projects_dir).await else {
            return Ok(projects);
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<ProjectData>(&content) {
                    Ok(data) => projects.push(ProjectListEntry {
                        project_name: stem.to_string(),
                        created_at: data.created_at,
                        updated_at: data.updated_at,
                    }),
                    Err(error) => log::warn!("skipping unreadable project {stem}: {error}"),
                },
                Err(error) => log::warn!("skipping unreadable project {stem}: {error}"),
            }
        }
        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(projects)
    }

    pub async fn delete_project(&self, name: &str) -> Result<(), ProjectError> {
        let path = self.project_path(name);
        if !path.exists() {
            return Err(ProjectError::NotFound(name.to_string()));
        }
        let is_current = self.current.lock().await.name.as_deref() == Some(name);
        if is_current {
            self.bus.clear().await;
            self.tree.reset().await;
            let mut current = self.current.lock().await;
            current.name = None;
            current.created_at = None;
            current.updated_at = None;
        }
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    pub async fn current_info(&self) -> ProjectInfo {
        let current = self.current.lock().await;
        ProjectInfo {
            project_name: current.name.clone(),
            created_at: current.created_at,
            updated_at: current.updated_at,
            message_count: self.bus.message_count().await,
            snapshot_count: self.tree.snapshot_count().await,
        }
    }

    /// Everything a front end needs to re-render: info, projected message
    /// history and the current snapshot.
    pub async fn full_data(&self) -> serde_json::Value {
        serde_json::json!({
            "project": self.current_info().await,
            "messages": self.bus.history().await,
            "incomplete_message_id": self.bus.incomplete_message_id().await,
            "current_snapshot": self.tree.current_snapshot().await,
        })
    }

    /// User-initiated rollback: erase every message strictly after the
    /// target and restore the snapshot recorded at or before it.
    pub async fn rollback_to_message(
        &self,
        message_id: &str,
    ) -> Result<RollbackOutcome, ProjectError> {
        let target_snapshot_id = self.bus.snapshot_at_or_before(message_id).await;
        let deleted_count = self.bus.truncate_after(message_id).await?;
        if let Some(snapshot_id) = &target_snapshot_id {
            self.tree.restore_snapshot(snapshot_id).await?;
        }

        let target_snapshot_id = target_snapshot_id.unwrap_or_default();
        log::info!(
            "rolled back to message {message_id}: deleted {deleted_count} messages, snapshot {target_snapshot_id}"
        );
        Ok(RollbackOutcome {
            success: true,
            message: format!("回退成功，删除了{deleted_count}条消息"),
            deleted_count,
            target_snapshot_id,
        })
    }

    /// Stop every processing agent; returns the stopped names.
    pub async fn stop_all_agents(&self) -> Vec<String> {
        let mut stopped = Vec::new();
        for (name, agent) in &self.agents {
            if agent.stop_processing().await {
                stopped.push(name.clone());
            }
        }
        stopped
    }
}
