//! Story Vault · story persistence and asset caching backend
//!
//! - Owner-scoped story slots, saved locally and published to a remote document store
//! - Asset resolution with a local cache in front of object storage
//! - Legacy path migration and audit
//! - Axum HTTP API
//!
//! Important env variables:
//!   PORT                 : u16 (default 3000)
//!   STORY_CONFIG_PATH    : path to TOML config
//!   STORAGE_ROOT         : local storage root (default "./data")
//!   SLOT_COUNT           : story slots per owner (default 6)
//!   DOCUMENT_STORE_URL   : enables remote publish/load if present
//!   OBJECT_STORAGE_URL   : enables asset uploads if present
//!   REMOTE_API_KEY       : bearer token for both remotes
//!   REMOTE_TIMEOUT_SECS  : per-request timeout (default 20)
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod error;
mod remote;
mod assets;
mod prefs;
mod identity;
mod repository;
mod migration;
mod state;
mod protocol;
mod routes;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, instrument, warn};

use crate::config::load_story_config_from_env;
use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = load_story_config_from_env();
  let state = AppState::new(config).await;

  // Pick up the last owner before the first request arrives.
  match state.rescope(None).await {
    Ok((owner, load)) if owner.is_default() => {
      info!(target: "story_vault", ?load, "No known owner; using the default scope until sign-in")
    }
    Ok((owner, load)) => info!(target: "story_vault", %owner, ?load, "Initial owner scope"),
    Err(e) => error!(target: "story_vault", error = %e, "Initial load failed; stories will load on first use"),
  }
  match state.migration.needs_migration().await {
    Ok(true) => warn!(target: "migration", "Legacy asset paths found; POST /api/v1/migration to convert"),
    Ok(false) => {}
    Err(e) => warn!(target: "migration", error = %e, "Migration check failed"),
  }

  let mut events = state.repository.subscribe();
  tokio::spawn(async move {
    loop {
      match events.recv().await {
        Ok(event) => debug!(target: "repository", ?event, "Repository event"),
        Err(RecvError::Lagged(n)) => warn!(target: "repository", skipped = n, "Event log lagged"),
        Err(RecvError::Closed) => break,
      }
    }
  });

  let app = build_router(state);

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "story_vault", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "story_vault", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "story_vault", error = %e, "Failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
  info!(target: "story_vault", "Shutdown requested");
}
