//! Local stand-in for the logspy backend.
//!
//! Run with: cargo run -p mock-backend -- --token dev
//!
//! Then start the agent with `--base-url ws://localhost:4000 --access-token dev`
//! and drive it over HTTP:
//!
//! ```text
//! curl localhost:4000/scripts
//! curl -XPOST localhost:4000/logpoints -H 'content-type: application/json' \
//!      -d '{"scriptId":"42","line":7}'
//! curl localhost:4000/hits
//! ```

mod agent;
mod api;
mod state;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{delete, get, post},
};
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "mock-backend", about = "Local logspy backend for development")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 4000)]
    port: u16,

    /// Access token agents must present
    #[arg(long, env = "LOGSPY_ACCESS_TOKEN", default_value = "dev")]
    token: String,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agent/session", get(agent::session_handler))
        .route("/api/agent/commands", get(agent::commands_handler))
        .route("/scripts", get(api::list_scripts))
        .route("/scripts/{id}/source", get(api::script_source))
        .route("/logpoints", post(api::add_logpoint))
        .route("/logpoints/{id}", delete(api::remove_logpoint))
        .route(
            "/scripts/{id}/lines/{line}/logpoints",
            delete(api::remove_logpoints_at),
        )
        .route("/hits", get(api::list_hits))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let app = router(AppState::new(args.token));

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    tracing::info!("Mock backend listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
