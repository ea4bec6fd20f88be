use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    core::{app_state::AppState, config::Config, db},
    relay,
};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Loads `.env` when present; a missing file is not an error.
pub fn init_env() {
    if let Err(err) = dotenvy::dotenv() {
        info!("No .env file loaded: {}", err);
    }
}

pub async fn build_state(config: Config) -> Result<AppState> {
    let db_pool = db::create_pool(&config.database).await?;
    Ok(AppState::new(db_pool, config))
}

/// Serves `app` until ctrl-c, with the outbox relay running alongside when a
/// broker is configured.
pub async fn bootstrap(
    service_name: &str,
    state: AppState,
    app: Router<AppState>,
) -> Result<()> {
    let relay_handle = match state.config.broker.amqp_url.clone() {
        Some(amqp_url) => {
            info!("Starting outbox relay against {}", amqp_url);
            Some(tokio::spawn(relay::run(state.clone(), amqp_url)))
        }
        None => {
            warn!("AMQP_URL not set, outbox relay disabled");
            None
        }
    };

    let address = state.config.server.address();
    let app = app.layer(TraceLayer::new_for_http()).with_state(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("{} listening on {}", service_name, address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = relay_handle {
        handle.abort();
    }
    info!("{} stopped", service_name);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
}
