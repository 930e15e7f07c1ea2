//! # STT Server - Main Application Entry Point
//!
//! An HTTP speech-to-text service. A client uploads an audio file to
//! `POST /stt`; the server converts it to 16 kHz mono 16-bit WAV with an
//! external transcoder, runs it through a recognition model loaded once at
//! startup, and answers with the recognized text.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Upload streaming and the transcoder process never block a worker
//! - **Arc**: The model is loaded once and shared read-only by every worker
//! - **Result<T, E>**: Startup failures (bad config, missing model) abort `main`
//! - **web::block**: CPU-bound recognition runs on the blocking thread pool
//!
//! ## Application Architecture:
//! - **config**: Application configuration (defaults + TOML file + environment variables)
//! - **state**: Shared application state and metrics
//! - **audio**: Per-request temp files, the transcoder, canonical WAV reading
//! - **transcription**: Model loading and the chunked recognition loop
//! - **handlers**: The `/stt` endpoint
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request ids, request logging, metrics collection
//! - **error**: Endpoint errors and their exact JSON bodies

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use crate::state::AppState;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Loads the recognition model** (failure here is fatal)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let temp_dir = config.storage.temp_path();
    std::fs::create_dir_all(&temp_dir)
        .with_context(|| format!("Failed to create temp dir {}", temp_dir.display()))?;

    let model = transcription::load_model(&config.models)
        .await
        .context("Failed to load recognition model")?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, model);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse order of registration for requests
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .route("/stt", web::post().to(handlers::speech_to_text))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "stt_server=trace")
/// - If not set, defaults to "stt_server=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stt_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Resolve when SIGINT (Ctrl+C) or, on unix, SIGTERM arrives.
///
/// In-flight requests get to finish because the server is stopped with
/// `graceful = true`.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
