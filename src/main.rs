//! # Vox Live Backend - Main Application Entry Point
//!
//! Backend service for live voice conversations: it hosts the microphone ->
//! live-model -> speaker pipeline on this machine and exposes the control
//! surface the dashboard talks to.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared state, metrics, voice studio and session registry
//! - **audio**: PCM codec, capture pipeline, playback scheduler, host devices
//! - **session**: live channel client, session controller, transcripts
//! - **remote**: vocal analysis / speech synthesis collaborators
//! - **websocket**: the `/ws/live` dashboard socket
//! - **handlers / health / middleware / error**: the REST surface

mod audio;       // Codec, capture, playback, devices
mod config;      // Configuration management (config.rs)
mod error;       // Error taxonomy and HTTP mapping (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod persona;     // Voice personas and languages
mod remote;      // Remote voice services and the studio
mod session;     // Live session core (session/ directory)
mod state;       // Application state management (state.rs)
mod websocket;   // Dashboard live socket (websocket.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer, middleware::Logger};
use anyhow::Result;
use config::AppConfig;
use remote::{RemoteVoiceClient, VoiceStudio};
use session::registry::SessionRegistry;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handlers and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env (if present); API_KEY usually
    // arrives this way
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting vox-live-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.channel.api_key.is_empty() {
        info!("No API_KEY configured; live sessions will fail to authenticate");
    }

    // The analyzer and synthesizer are the same remote endpoint with
    // different models; two clients keep the trait objects independent
    let analyzer = RemoteVoiceClient::new(&config.remote)
        .map_err(|e| anyhow::anyhow!("remote client setup failed: {}", e))?;
    let synthesizer = RemoteVoiceClient::new(&config.remote)
        .map_err(|e| anyhow::anyhow!("remote client setup failed: {}", e))?;
    let studio = Arc::new(VoiceStudio::new(Box::new(analyzer), Box::new(synthesizer)));
    let registry = Arc::new(SessionRegistry::new(
        config.performance.max_concurrent_sessions,
    ));

    let app_state = AppState::new(config.clone(), studio, registry.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();
    spawn_registry_sweeper(registry, config.performance.session_max_age_seconds);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/personas", web::get().to(handlers::list_personas))
                    .route("/personas/{id}", web::delete().to(handlers::delete_persona))
                    .route("/clone", web::post().to(handlers::clone_voice))
                    .route("/synthesize", web::post().to(handlers::synthesize))
                    .route("/assets", web::get().to(handlers::list_assets))
                    .route("/assets", web::delete().to(handlers::clear_assets))
                    .route("/assets/{id}/wav", web::get().to(handlers::download_asset_wav)),
            )
            .route("/ws/live", web::get().to(websocket::live_socket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` controls the filter; without it, the backend logs at debug and
/// actix at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vox_live_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Periodically sweep finished or abandoned session records.
fn spawn_registry_sweeper(registry: Arc<SessionRegistry>, max_age_seconds: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            let removed = registry.cleanup(max_age_seconds);
            if removed > 0 {
                info!("Swept {} finished session record(s)", removed);
            }
        }
    });
}

/// Poll the shutdown flag without blocking other tasks.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
