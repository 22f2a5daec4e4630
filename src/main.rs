use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use builder6::agent::{Orchestrator, PlanningRequest};
use builder6::config::AppConfig;
use builder6::containers::ContainerSupervisor;
use builder6::github::GitHubClient;
use builder6::llm::LlmService;
use builder6::store::{PgStore, Store};
use builder6::tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "builder6", version, about = "Autonomous coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an execution plan for a development goal.
    Plan {
        /// The development goal to plan for.
        #[arg(long)]
        prompt: String,
        /// Repository the work targets.
        #[arg(long = "repo-url")]
        repo_url: String,
        /// Optional RFC 3339 deadline for the session.
        #[arg(long)]
        deadline: Option<String>,
    },
    /// Execute a previously planned session.
    Execute {
        #[arg(long = "session-id")]
        session_id: String,
    },
    /// Destroy containers idle beyond the configured timeout.
    CleanupContainers,
    /// List recent sessions.
    ListSessions {
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Run the evaluation harness.
    RunEvaluation {
        #[arg(long)]
        html: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("configuration error")?;
    init_tracing(config.debug_enabled);

    match cli.command {
        Command::Plan {
            prompt,
            repo_url,
            deadline,
        } => {
            let deadline = deadline.map(|d| parse_deadline(&d)).transpose()?;
            let orchestrator = build_orchestrator(&config).await?;
            let tasks = orchestrator
                .start_planning(PlanningRequest {
                    prompt,
                    repo_url,
                    deadline,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        Command::Execute { session_id } => {
            let orchestrator = build_orchestrator(&config).await?;
            let report = orchestrator.execute_plan(&session_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::CleanupContainers => {
            let supervisor = ContainerSupervisor::new(config.docker.clone())?;
            let cleaned = supervisor.cleanup_idle_containers().await?;
            println!("{cleaned}");
        }
        Command::ListSessions { limit } => {
            let store = PgStore::connect(&config.database_url).await?;
            let sessions = store.list_sessions(limit).await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        Command::RunEvaluation { html: _ } => {
            bail!("the evaluation harness ships separately and is not part of this binary");
        }
    }

    Ok(())
}

fn init_tracing(debug_enabled: bool) {
    let default_filter = if debug_enabled {
        "builder6=debug"
    } else {
        "builder6=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_deadline(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .with_context(|| format!("invalid deadline '{raw}', expected RFC 3339"))
}

async fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    let supervisor = Arc::new(ContainerSupervisor::new(config.docker.clone())?);
    let github = Arc::new(GitHubClient::new(config.github_token.clone()));

    let registry = Arc::new(
        ToolRegistry::standard()
            .with_container_tools(supervisor.clone())
            .with_github_tools(github, supervisor),
    );
    let runner = Arc::new(LlmService::from_config(config.llm.clone(), registry)?);

    Ok(Orchestrator::new(store, runner))
}
