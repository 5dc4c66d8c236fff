//! Sieve Agent Binary
//!
//! Entry point for the host-local telemetry agent.

#![deny(unsafe_code)]

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let config = agent::Config::from_env()?;
    agent::init_tracing(config.log_format);

    agent::run_agent_with_config(config).await
}
