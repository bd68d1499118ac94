use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sitechat::config::{Config, CredentialMode};
use sitechat::llm::LLMClient;
use sitechat::scraper::ProxyScraper;
use sitechat::server::{create_router, spawn_session_sweeper, AppState, SharedState};
use sitechat::{ApiKey, Orchestrator, Session, TurnOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sitechat", version, about = "Ask questions about any web page")]
struct Cli {
    /// Config file (defaults to $SITECHAT_CONFIG, then ~/.config/sitechat/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the session API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Answer a single question about a page and exit
    Ask {
        #[arg(short, long)]
        url: String,
        #[arg(short, long)]
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env
    dotenv::dotenv().ok();

    // Initialize tracing
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
        .add_directive("sitechat=debug".parse()?);

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_auto()?,
    };

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Ask { url, question } => ask(config, &url, &question).await,
    }
}

fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let scraper = Arc::new(ProxyScraper::new(&config.scraper)?);
    let answerer = Arc::new(LLMClient::new(&config.llm)?);
    Ok(Orchestrator::new(
        scraper,
        answerer,
        config.session.duplicate_policy,
    ))
}

fn require_env_key(config: &Config) -> Result<ApiKey> {
    match ApiKey::from_env(&config.llm.api_key_env) {
        Some(key) => Ok(key),
        None => {
            warn!(
                "Please set the {} environment variable",
                config.llm.api_key_env
            );
            bail!("{} is not set", config.llm.api_key_env)
        }
    }
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    info!("sitechat starting");

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    // Resolve credentials
    let env_credentials = match config.session.credentials {
        CredentialMode::Environment => Some(require_env_key(&config)?),
        CredentialMode::Interactive => {
            info!("Interactive credential mode: sessions must supply an API key");
            None
        }
    };

    // Initialize components
    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let config = Arc::new(config);

    let listener_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Binding to {}", listener_addr);

    // Create application state
    let state: SharedState = Arc::new(AppState::new(
        config.clone(),
        orchestrator,
        env_credentials,
    ));

    // Expire idle sessions
    spawn_session_sweeper(state.clone());

    // Create router
    let app = create_router(state);

    // Start server
    let listener = TcpListener::bind(&listener_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listener_addr))?;
    info!("Server listening on http://{}", listener_addr);

    axum::serve(listener, app).await.map_err(|e| {
        error!("Server error: {}", e);
        e.into()
    })
}

async fn ask(config: Config, url: &str, question: &str) -> Result<()> {
    let key = require_env_key(&config)?;
    let orchestrator = build_orchestrator(&config)?;
    let mut session = Session::new(Some(key));

    match orchestrator.handle_turn(&mut session, url, question).await {
        TurnOutcome::Answered { response, .. } => {
            println!("{}", response);
            Ok(())
        }
        TurnOutcome::Skipped(reason) => bail!("Turn skipped: {:?}", reason),
    }
}
