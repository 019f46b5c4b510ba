//! logspy agent binary.
//!
//! Attaches to a V8 inspector and serves the backend's command stream.
//!
//! Run with: cargo run -p logspy-agent -- --help

use clap::Parser;
use logspy_agent::{AgentArgs, AgentConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AgentConfig::from(AgentArgs::parse());
    match logspy_agent::init(config)? {
        Some(agent) => agent.join()?,
        None => tracing::info!("nothing to do, set LOGSPY_ENV=production or LOGSPY_BASE_URL"),
    }
    Ok(())
}
