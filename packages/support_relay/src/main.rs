use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod metrics;
mod models;
mod relay;
mod repository;
mod retry;
#[cfg(test)]
mod test_helpers;
mod views;

use crate::auth::{AdminSecret, TokenSigner};
use crate::config::{
    AuthConfig, DEFAULT_PORT, FileConfig, Profile, RelayConfig, ServerConfig, StoreConfig,
};
use crate::db::Database;
use crate::metrics::RelayMetrics;
use crate::relay::continuity::SessionContinuity;
use crate::relay::presence::PresenceRegistry;
use crate::relay::router::EventRouter;
use crate::repository::RelayRepository;

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
#[command(name = "relay")]
#[command(about = "Real-time customer support chat relay")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.support-relay)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground (the default)
    Server(ServerArgs),

    /// Print the effective configuration and exit
    Config(ConfigArgs),
}

#[derive(Parser, Default)]
struct ServerArgs {
    /// Port for the web server (defaults to 5000)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Configuration profile
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,

    /// Forget every remembered admin session
    #[arg(long)]
    reset_sessions: bool,
}

#[derive(Parser)]
struct ConfigArgs {
    /// Configuration profile
    #[arg(long, value_enum)]
    profile: Option<Profile>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Session cookie settings
    pub auth_config: Arc<AuthConfig>,
    pub signer: Arc<TokenSigner>,
    /// Relay metrics for observability
    pub metrics: Arc<RelayMetrics>,
    pub db: Arc<Database>,
    pub repo: RelayRepository,
    pub router: Arc<EventRouter>,
}

pub(crate) fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(views::index_page))
        .route("/ws", get(handlers::relay_websocket_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RelayConfig::new(cli.data_dir.clone())?;

    match cli.command {
        None => run_server(ServerArgs::default(), config).await,
        Some(Commands::Server(args)) => run_server(args, config).await,
        Some(Commands::Config(args)) => print_config(args, &config),
    }
}

fn print_config(args: ConfigArgs, config: &RelayConfig) -> Result<()> {
    let mut file_config: FileConfig = config::load_config(&config.data_dir, args.profile.as_ref())
        .extract()
        .context("Invalid configuration")?;

    // Never echo secrets
    for secret in [
        &mut file_config.auth.admin_password,
        &mut file_config.auth.session_secret,
    ] {
        if secret.is_some() {
            *secret = Some("<redacted>".to_string());
        }
    }

    println!("# {}", config.config_toml_path().display());
    println!("{}", serde_json::to_string_pretty(&file_config)?);
    Ok(())
}

async fn run_server(args: ServerArgs, config: RelayConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "relay=debug,tower_http=debug,info"
    } else {
        "relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting support relay");

    let file_config: FileConfig = config::load_config(&config.data_dir, args.profile.as_ref())
        .extract()
        .context("Invalid configuration")?;
    info!(
        "Config: {} (profile: {:?})",
        config.config_toml_path().display(),
        file_config.profile
    );

    let auth_config = AuthConfig::from_file(&file_config.auth);
    let server_config = ServerConfig::from_file(&file_config.server);
    let store_config = StoreConfig::from_file(&file_config.store);

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all stored chat messages and admin sessions!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            config.reset_database()?;
            println!("Database reset.");
        } else {
            println!("Cancelled.");
        }
    }

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config, &store_config).await?);
    let repo = RelayRepository::new(db.pool.clone(), store_config.retry.clone());

    if args.reset_sessions {
        let removed = repo.delete_all_admin_sessions().await?;
        info!("Removed {} admin sessions", removed);
    }

    match db.get_stats().await {
        Ok(stats) => info!(
            "Store: {} messages ({} hidden), {} admin sessions",
            stats.messages, stats.hidden_messages, stats.admin_sessions
        ),
        Err(e) => warn!("Failed to read store stats: {}", e),
    }

    // Admin secret and session tokens
    let secret = AdminSecret::from_config(&auth_config)?;
    if secret.is_configured() {
        info!(
            "Admin login enabled (session TTL: {}s)",
            auth_config.session_ttl.as_secs()
        );
    }
    let signer = Arc::new(TokenSigner::from_config(&auth_config)?);

    let metrics = Arc::new(RelayMetrics::new());
    let continuity = SessionContinuity::new(repo.clone(), secret, auth_config.session_ttl);
    let router = Arc::new(EventRouter::new(
        Arc::new(PresenceRegistry::new()),
        repo.clone(),
        continuity,
        metrics.clone(),
        server_config.clone(),
    ));
    info!(
        "Relay limits: outbox={} events, max_message={} chars, max_login_failures={}",
        server_config.send_channel_capacity,
        server_config.max_message_chars,
        server_config.max_login_failures
    );

    // Spawn periodic expired session cleanup
    {
        let cleanup_repo = repo.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match cleanup_repo.cleanup_expired_sessions().await {
                    Ok(0) => {}
                    Ok(n) => info!("Cleaned up {} expired admin sessions", n),
                    Err(e) => warn!("Admin session cleanup failed: {}", e),
                }
            }
        });
    }

    let app_state = AppState {
        auth_config: Arc::new(auth_config),
        signer,
        metrics,
        db,
        repo,
        router,
    };
    let app = app_router(app_state);

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.or(file_config.server.port).unwrap_or(DEFAULT_PORT);
    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Support relay listening on http://{}", actual_addr);
    info!("");
    info!("Chat UI: http://{}/", actual_addr);
    info!("Endpoints:");
    info!("  GET    /ws            - Relay WebSocket");
    info!("  GET    /health        - Presence and error summary");
    info!("  GET    /health/ready  - Store readiness");
    info!("  GET    /metrics       - Relay counters");

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, closing connections...");
    };

    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    info!("Shutdown complete");
    server_result
}
