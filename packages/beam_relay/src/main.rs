use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod clipboard;
mod config;
mod db;
mod handlers;
mod identity;
mod metrics;
mod models;
mod repository;
mod ws;

use crate::config::{BeamRelayConfig, FileConfig, RelayConfig};
use crate::db::Database;
use crate::metrics::RelayMetrics;
use crate::repository::RelayRepository;
use crate::ws::RelayState;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "beamd")]
#[command(about = "Key-protected relay hub for multi-device beam sessions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.beamrelay)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground
    Server(ServerArgs),

    /// Create a beam and print its id and key
    CreateBeam(CreateBeamArgs),

    /// Create a user with a session token for identity-attributed captures
    CreateUser(CreateUserArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port for the relay server (default 8321; config.toml can override)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (default 127.0.0.1; config.toml can override)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct CreateBeamArgs {
    /// Human-readable beam name
    #[arg(long)]
    name: Option<String>,
}

#[derive(Parser)]
struct CreateUserArgs {
    /// Unique username
    username: String,

    /// Display name (defaults to the username)
    #[arg(long)]
    display_name: Option<String>,

    /// Session lifetime in days
    #[arg(long, default_value = "30")]
    session_days: i64,
}

#[derive(Clone)]
#[allow(dead_code)]
pub(crate) struct AppState {
    pub config: Arc<BeamRelayConfig>,
    /// Relay tunables (auth mode, timeouts, queue depth)
    pub relay_config: RelayConfig,
    /// Server metrics for observability
    pub metrics: Arc<RelayMetrics>,
    pub db: Arc<Database>,
    pub repository: Arc<RelayRepository>,
    /// Shared group membership and presence rosters
    pub relay_state: Arc<RelayState>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BeamRelayConfig::new(cli.data_dir.clone())?;

    match cli.command {
        None => {
            run_server(
                ServerArgs {
                    port: None,
                    host: None,
                    debug: false,
                },
                config,
            )
            .await
        }
        Some(Commands::Server(args)) => run_server(args, config).await,
        Some(Commands::CreateBeam(args)) => create_beam_command(config, args).await,
        Some(Commands::CreateUser(args)) => create_user_command(config, args).await,
    }
}

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8321;

/// Bind address resolution: explicit CLI flag → config.toml → default.
fn resolve_bind(
    cli_host: Option<String>,
    cli_port: Option<u16>,
    server: &config::ServerFileConfig,
) -> (String, u16) {
    let host = cli_host
        .or_else(|| server.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = cli_port.or(server.port).unwrap_or(DEFAULT_PORT);
    (host, port)
}

const TOKEN_LEN: usize = 43;

fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

async fn create_beam_command(config: BeamRelayConfig, args: CreateBeamArgs) -> Result<()> {
    let db = Database::new(&config).await?;
    let repository = RelayRepository::new(db.pool.clone());

    let beam_id = Uuid::new_v4().to_string();
    let beam_key = random_token();
    let beam = repository
        .create_beam(&beam_id, &beam_key, args.name.as_deref())
        .await?;

    println!("beam_id:  {}", beam.beam_id);
    println!("beam_key: {}", beam.beam_key);
    if let Some(name) = &beam.beam_name {
        println!("name:     {}", name);
    }
    Ok(())
}

async fn create_user_command(config: BeamRelayConfig, args: CreateUserArgs) -> Result<()> {
    let db = Database::new(&config).await?;
    let repository = RelayRepository::new(db.pool.clone());

    let user_id = Uuid::new_v4().to_string();
    let display_name = args.display_name.as_deref().unwrap_or(&args.username);
    repository
        .create_user(&user_id, &args.username, display_name)
        .await?;

    let token = random_token();
    let expires_at = chrono::Utc::now().timestamp() + args.session_days * 24 * 3600;
    repository.create_session(&token, &user_id, expires_at).await?;

    println!("user_id:       {}", user_id);
    println!("username:      {}", args.username);
    println!("session_token: {}", token);
    println!("expires_at:    {}", expires_at);
    Ok(())
}

async fn run_server(args: ServerArgs, config: BeamRelayConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "beamd=debug,tower_http=debug,info"
    } else {
        "beamd=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting beam relay hub");

    let config = Arc::new(config);

    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .context("Invalid configuration")?;
    let relay_config = RelayConfig::from_file(&file_config.relay);
    info!(
        require_beam_key = relay_config.require_beam_key,
        outbound_capacity = relay_config.outbound_channel_capacity,
        "Relay configuration loaded"
    );

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(RelayRepository::new(db.pool.clone()));

    // Initialize metrics and shared relay state
    let metrics = Arc::new(RelayMetrics::new());
    let relay_state = Arc::new(RelayState::new(metrics.clone()));

    let app_state = AppState {
        config: config.clone(),
        relay_config,
        metrics,
        db,
        repository,
        relay_state,
    };

    let (host, port) = resolve_bind(args.host, args.port, &file_config.server);

    let app = Router::new()
        .route("/ws/beam/{beam_id}", get(handlers::beam_websocket_handler))
        .route("/api/beams/{beam_id}/notes", get(handlers::get_beam_notes))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Beam relay listening on http://{}", actual_addr);
    info!("  GET /ws/beam/:beam_id - WebSocket relay endpoint");
    info!("  GET /health           - Health summary");
    info!("  GET /metrics          - Runtime counters");

    // Create shutdown signal handler
    let shutdown_signal = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, shutting down...");
        }
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
