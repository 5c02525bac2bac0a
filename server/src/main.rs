//! Exam registration server.
//!
//! This binary:
//! - Loads configuration from the environment (and `.env`)
//! - Installs tracing and the Prometheus exporter
//! - Connects to `PostgreSQL` and applies migrations
//! - Serves the registration API and payment webhook until SIGINT/SIGTERM
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/exams \
//! PAYMENT_WEBHOOK_SECRET=whsec_... \
//! cargo run -p exam-registration-server
//! ```

mod config;
mod telemetry;

use config::Config;
use exam_registration_core::engine::{EngineConfig, RegistrationEngine};
use exam_registration_core::environment::SystemClock;
use exam_registration_core::reconciler::{Reconciler, WebhookVerifier};
use exam_registration_postgres::{PostgresRegistrationStore, PostgresScheduleDirectory, migrate};
use exam_registration_web::{AppState, RouterConfig, build_router};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    telemetry::init_tracing();
    info!("Starting exam registration server");

    let config = Config::from_env()?;
    info!(
        addr = %config.server.addr(),
        metrics_addr = %config.server.metrics_addr(),
        webhook_authenticated = config.webhook.secret.is_some(),
        admin_enabled = config.admin_token.is_some(),
        code_length = config.engine.codes.length(),
        "Configuration loaded"
    );

    telemetry::install_metrics(config.server.metrics_addr())?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.connect_timeout)
        .connect(config.database.url.expose_secret())
        .await?;
    migrate(&pool).await?;
    info!("Database ready");

    let engine = RegistrationEngine::new(
        Arc::new(PostgresRegistrationStore::new(pool.clone())),
        Arc::new(PostgresScheduleDirectory::new(pool.clone())),
        Arc::new(config.engine.codes),
        Arc::new(SystemClock),
        EngineConfig {
            storage_timeout: config.engine.storage_timeout,
            ..EngineConfig::default()
        },
    );
    let verifier = WebhookVerifier::new(config.webhook.secret.clone(), config.webhook.tolerance);
    let state = AppState::new(
        engine.clone(),
        Reconciler::new(engine, verifier),
        config.admin_token.clone(),
    );
    let app = build_router(
        state,
        &RouterConfig {
            request_timeout: config.server.request_timeout,
            cors_allowed_origins: config.server.cors_allowed_origins.clone(),
        },
    );

    let listener = tokio::net::TcpListener::bind(config.server.addr()).await?;
    info!(addr = %config.server.addr(), "HTTP server listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.server.shutdown_timeout, server).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server failed"),
        Ok(Err(e)) => error!(error = %e, "HTTP server task failed"),
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "In-flight requests did not finish before the shutdown timeout"
        ),
    }

    pool.close().await;
    info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
