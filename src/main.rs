//! Drill Gauntlet backend
//!
//! - Axum HTTP + WebSocket API
//! - Optional OpenAI integration (via environment variables)
//!
//! Important env variables:
//!   PORT                 : u16 (default 3000)
//!   OPENAI_API_KEY       : enables OpenAI drill generation and scoring if present
//!   OPENAI_BASE_URL      : default "https://api.openai.com/v1"
//!   OPENAI_FAST_MODEL    : default "gpt-4o-mini" (scoring)
//!   OPENAI_STRONG_MODEL  : default "gpt-4o" (drill generation)
//!   GAUNTLET_CONFIG_PATH : path to TOML config (prompts, game tuning, drill bank)
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use drill_gauntlet::routes::build_router;
use drill_gauntlet::state::AppState;
use drill_gauntlet::telemetry;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: config, drill/scoring services, profile store.
  let state = Arc::new(AppState::new());

  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "drill_gauntlet", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "drill_gauntlet", "Shutdown signal received");
    })
    .await?;
  Ok(())
}
