//! Sieve Agent
//!
//! Host-local process around the Sieve pipeline. It accepts metrics, logs
//! and traces over HTTP, reduces them (cardinality control, sampling,
//! aggregation) and forwards the result to an OTLP/HTTP collector.
//!
//! # Example
//!
//! ```no_run
//! use agent::run_agent;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_agent().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
pub mod routes;
mod state;

pub use config::{Config, LogFormat};
pub use state::AppState;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use pipeline::Pipeline;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Runs the agent with configuration from the environment.
///
/// # Errors
///
/// Fails when the `SIEVE_*` variables or the referenced config file are
/// invalid, or when serving fails.
pub async fn run_agent() -> Result<()> {
    let config = Config::from_env()?;
    run_agent_with_config(config).await
}

/// Runs the agent with the provided configuration.
///
/// Starts the pipeline, serves HTTP until SIGINT/SIGTERM, then drains the
/// pipeline within the configured shutdown timeout.
///
/// # Errors
///
/// Returns an error if the pipeline configuration is invalid, the listener
/// cannot bind, or pending exports did not drain within
/// `Config::shutdown_timeout`.
pub async fn run_agent_with_config(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;
    let pipeline = Arc::new(Pipeline::new(config.pipeline)?);
    pipeline.start();

    tracing::info!(
        endpoint = %pipeline.config().export.base_url(),
        aggregation = pipeline.config().aggregation.enabled,
        sampling = pipeline.config().sampling.enabled,
        "Sieve agent starting"
    );

    let app = create_router(AppState::new(Arc::clone(&pipeline)));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Accepting telemetry");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    pipeline.shutdown(config.shutdown_timeout).await?;
    served?;

    tracing::info!("Agent shutdown complete");
    Ok(())
}

/// Creates the application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::stats_routes(state.clone()))
        .merge(routes::ingest_routes(state))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

/// Resolves on SIGINT or SIGTERM. The HTTP listener stops first, then the
/// pipeline drains.
async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");

    #[cfg(unix)]
    let terminate = async move {
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.expect("Failed to install Ctrl+C handler");
            "SIGINT"
        }
        () = terminate => "SIGTERM",
    };
    tracing::info!(signal, "Stopping ingestion and draining pipeline");
}
