//! # Transcription Backend - Main Application Entry Point
//!
//! This is the main entry point for the transcription-backend web server.
//! It accepts uploaded audio/video files, runs an external transcription
//! program on each one in the background, and serves job status over HTTP.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Error handling using Rust's Result type
//! - **Arc**: Thread-safe shared ownership of long-lived services
//! - **static**: Global shutdown flag that lives for the entire program duration
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **db**: SQLite connection, migrations and the jobs table
//! - **jobs**: Job model, lifecycle manager and background runner
//! - **transcription**: The external engine contract
//! - **storage**: Upload validation and placement on disk
//! - **middleware**: Bearer-token auth and per-client rate limits
//! - **handlers**: HTTP request handlers for API endpoints
//! - **health**: Liveness and metrics endpoints
//! - **error**: HTTP error responses

// Module declarations - These tell Rust about our other source files
mod config;         // Configuration management (config.rs)
mod db;             // SQLite storage (db/ directory)
mod error;          // Error handling types (error.rs)
mod handlers;       // HTTP request handlers (handlers/ directory)
mod health;         // Health check endpoints (health.rs)
mod jobs;           // Job lifecycle (jobs/ directory)
mod middleware;     // Custom middleware (middleware/ directory)
mod state;          // Application state (state.rs)
mod storage;        // Upload storage (storage.rs)
mod transcription;  // Transcription engine (transcription/ directory)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use db::Database;
use handlers::RouteGuards;
use state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::CommandEngine;

/// Global shutdown signal set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Opens the job database** and fails jobs a previous run left unfinished
/// 4. **Creates shared application state** (job manager, runner, upload store)
/// 5. **Configures the HTTP server** with middleware and routes
/// 6. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting transcription-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let database = Database::open(&config.storage.database_path).with_context(|| {
        format!(
            "failed to open job database at {}",
            config.storage.database_path.display()
        )
    })?;

    let engine = Arc::new(CommandEngine::from_config(&config.transcription));
    info!(
        program = %config.transcription.program,
        args = ?config.transcription.args,
        max_concurrent_jobs = config.transcription.max_concurrent_jobs,
        timeout_secs = config.transcription.timeout_secs,
        "Transcription engine configured"
    );

    let (app_state, outcomes) = AppState::new(config.clone(), Arc::new(database), engine);

    let recovered = app_state
        .jobs
        .recover_interrupted()
        .await
        .context("failed to recover jobs interrupted by the previous run")?;
    if recovered > 0 {
        warn!("Marked {} interrupted job(s) as failed", recovered);
    }

    app_state
        .uploads
        .ensure_dir()
        .await
        .context("failed to create upload directory")?;
    info!(upload_dir = %app_state.uploads.dir().display(), "Upload directory ready");

    let monitor = jobs::spawn_outcome_monitor(outcomes);

    if config.security.api_token.is_none() {
        warn!("No API token configured (SECRET_KEY / security.api_token); job routes are open");
    }

    // Built once so every worker shares the same rate-limit buckets.
    let guards = RouteGuards::from_config(&config);
    let allowed_origins = config.security.allowed_origins.clone();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = build_cors(&allowed_origins);
        let guards = guards.clone();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse order of registration for requests
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(|cfg| handlers::configure(cfg, &guards))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Running jobs are abandoned here; the next start marks them failed.
    monitor.abort();
    info!("Server stopped gracefully");
    Ok(())
}

/// Configured origins, or any origin when none are listed.
fn build_cors(allowed_origins: &[String]) -> Cors {
    let cors = if allowed_origins.is_empty() {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "transcription_backend=trace")
/// - If not set, defaults to "transcription_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcription_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

/// Set up signal handlers for graceful shutdown (SIGTERM and Ctrl+C).
///
/// When either signal arrives the global shutdown flag is set and
/// `wait_for_shutdown` returns.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
