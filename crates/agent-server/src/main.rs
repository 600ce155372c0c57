use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use agent_llm::{DeepSeekClient, LlmClient, DEFAULT_BASE_URL};
use agent_server::{run_server, ProjectManager};

#[derive(Parser, Debug)]
#[command(name = "research-copilot-server")]
#[command(about = "Collaborative research-planning server")]
#[command(version)]
struct Cli {
    /// Server port
    #[arg(long, env = "PORT", default_value = "8008")]
    port: u16,

    /// LLM API key
    #[arg(long, env = "DEEPSEEK_API_KEY", default_value = "")]
    api_key: String,

    /// LLM API base URL
    #[arg(long, env = "DEEPSEEK_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Reasoner model name
    #[arg(long, env = "DEEPSEEK_REASONER_MODEL", default_value = "deepseek-reasoner")]
    model: String,

    /// Directory holding the project save files
    #[arg(long, env = "PROJECTS_DIR")]
    projects_dir: Option<PathBuf>,
}

fn default_projects_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".research-copilot")
        .join("projects")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let cli = Cli::parse();

    if cli.api_key.is_empty() {
        log::warn!("no API key configured; LLM calls will fail until DEEPSEEK_API_KEY is set");
    }

    let projects_dir = cli.projects_dir.unwrap_or_else(default_projects_dir);
    log::info!("starting research-copilot server on port {}", cli.port);
    log::info!("  model: {} via {}", cli.model, cli.base_url);
    log::info!("  projects dir: {}", projects_dir.display());

    let llm: Arc<dyn LlmClient> = Arc::new(
        DeepSeekClient::reasoner(cli.api_key)
            .with_base_url(cli.base_url)
            .with_model(cli.model),
    );

    let project = Arc::new(ProjectManager::new(projects_dir, llm));
    project.auto_restore().await;

    run_server(cli.port, project).await
}
