//! LaTeX Compilation Server
//!
//! HTTP front-end for the latex-engine crate. Provides REST API endpoints
//! for:
//!
//! - Single-file compilation (multipart upload of a `.tex` file)
//! - Project compilation (nested JSON folder tree)
//! - Service introspection (supported extensions, available compilers)
//!
//! ## Architecture
//!
//! Handlers only decode requests and encode results; every compilation
//! runs through one shared [`Engine`], which owns no per-request state.
//! The server adds:
//!
//! - Rate limiting via tower-governor
//! - Request body limits
//! - CORS and request tracing

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use clap::Parser;
use latex_engine::config::{
    DEFAULT_BIBLIOGRAPHY_TIMEOUT_SECS, DEFAULT_COMPILE_TIMEOUT_SECS, DEFAULT_FETCH_TIMEOUT_SECS,
    DEFAULT_MAX_PASSES,
};
use latex_engine::{Engine, EngineConfig};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;

use api::{
    handle_compile_project, handle_compile_single, handle_compilers, handle_health, handle_info,
    handle_root,
};

/// Command-line arguments for the LaTeX server
#[derive(Parser, Debug)]
#[command(name = "latex-server")]
#[command(about = "HTTP service compiling LaTeX documents and projects to PDF")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Wall-clock limit for one compiler pass, in seconds
    #[arg(long, env = "COMPILE_TIMEOUT_SECS", default_value_t = DEFAULT_COMPILE_TIMEOUT_SECS)]
    compile_timeout_secs: u64,

    /// Wall-clock limit for one bibliography processor run, in seconds
    #[arg(long, env = "BIBLIOGRAPHY_TIMEOUT_SECS", default_value_t = DEFAULT_BIBLIOGRAPHY_TIMEOUT_SECS)]
    bibliography_timeout_secs: u64,

    /// Wall-clock limit for downloading one remote asset, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = DEFAULT_FETCH_TIMEOUT_SECS)]
    fetch_timeout_secs: u64,

    /// Maximum compiler passes per request
    #[arg(long, env = "MAX_PASSES", default_value_t = DEFAULT_MAX_PASSES)]
    max_passes: u32,

    /// Directory for per-request scratch trees (system temp dir if unset)
    #[arg(long, env = "SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Rate limit: requests per second per IP
    #[arg(long, env = "RATE_LIMIT", default_value = "10")]
    rate_limit: u32,

    /// Allowed CORS origins, comma separated (any origin if empty)
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Maximum request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "52428800")]
    max_body_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            compile_timeout_secs: self.compile_timeout_secs,
            bibliography_timeout_secs: self.bibliography_timeout_secs,
            fetch_timeout_secs: self.fetch_timeout_secs,
            max_passes: self.max_passes,
            scratch_root: self.scratch_dir.clone(),
            ..EngineConfig::default()
        }
    }

    fn cors(&self) -> anyhow::Result<CorsLayer> {
        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if self.allowed_origins.is_empty() {
            return Ok(cors.allow_origin(Any));
        }
        let origins = self
            .allowed_origins
            .iter()
            .map(|o| {
                o.trim()
                    .parse::<HeaderValue>()
                    .with_context(|| format!("invalid CORS origin '{}'", o))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(cors.allow_origin(AllowOrigin::list(origins)))
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// Routes and the middleware every deployment needs
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        // Liveness
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        // Introspection
        .route("/info", get(handle_info))
        .route("/compilers", get(handle_compilers))
        // Compilation
        .route("/compile-single", post(handle_compile_single))
        .route("/compile-project", post(handle_compile_project))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting LaTeX server on {}:{}", args.host, args.port);

    let engine = Engine::new(args.engine_config())?;

    // Create rate limiter configuration
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(args.rate_limit.into())
            .burst_size(args.rate_limit * 2)
            .finish()
            .ok_or_else(|| anyhow!("rate limit must be greater than zero"))?,
    );

    let app = build_router(AppState { engine }, args.max_body_bytes)
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(args.cors()?);

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Rate limit: {} requests/second per IP", args.rate_limit);
    info!(
        "Compile timeout: {}s, max passes: {}",
        args.compile_timeout_secs, args.max_passes
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("LaTeX server shut down");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
