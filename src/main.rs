//! # Live Tutor Backend - Main Application Entry Point
//!
//! Starts the live session controller and the Actix-web server that exposes it.
//!
//! ## Startup order:
//! 1. `.env`, logging, configuration
//! 2. The live session controller task (owns every audio device and the remote session)
//! 3. The HTTP server with CORS, request tracing and metrics middleware
//!
//! ## Shutdown:
//! On SIGINT/SIGTERM the live session is stopped first, so the microphone and
//! speakers are released, then the server drains its connections.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use live_tutor_backend::config::AppConfig;
use live_tutor_backend::device::CpalPlatform;
use live_tutor_backend::handlers;
use live_tutor_backend::live::gemini::GeminiConnector;
use live_tutor_backend::live::{ControllerHandle, LiveSessionController, SessionState};
use live_tutor_backend::middleware;
use live_tutor_backend::state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting live-tutor-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.live.resolved_api_key().is_none() {
        warn!("No API key configured; live sessions will fail to connect");
    }

    let live = LiveSessionController::new(Arc::new(CpalPlatform), Arc::new(GeminiConnector)).spawn();
    let app_state = AppState::new(config.clone(), live.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

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
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .disable_signals()
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
        signal = wait_for_shutdown() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            stop_live_session(&live).await;
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise `live_tutor_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_tutor_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

async fn stop_live_session(live: &ControllerHandle) {
    if live.status().state == SessionState::Idle {
        return;
    }
    info!("Stopping live session before shutdown");
    if let Err(e) = live.stop().await {
        warn!("Live session did not stop cleanly: {}", e);
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}
