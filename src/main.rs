use std::sync::Arc;

use grocery_dispatch::api;
use grocery_dispatch::config::Config;
use grocery_dispatch::engine::assignment::run_assignment_engine;
use grocery_dispatch::error::AppError;
use grocery_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let http_port = config.http_port;
    let (app_state, order_rx) = AppState::from_config(config)?;
    let shared_state = Arc::new(app_state);

    let routing = match shared_state.config.routing_url {
        Some(_) => "osrm",
        None => "straight_line",
    };
    let otp = match shared_state.config.otp_verify_url {
        Some(_) => "http",
        None => "in_memory",
    };
    tracing::info!(routing, otp, "collaborators configured");

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_assignment_engine(shared_state.clone(), order_rx));

    let bind_addr = format!("0.0.0.0:{}", http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
