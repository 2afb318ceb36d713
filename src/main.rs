//! Quiz Group · Question-bank backend
//!
//! - Axum HTTP API for grouped multiple-choice questions
//!   (standard, matching columns, cloze, reading comprehension)
//! - Groups are assembled from flat records and saved back by reconciliation
//! - Optional image upload service (via environment or TOML config)
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   QUIZ_CONFIG_PATH  : path to TOML config (engine, storage, media)
//!   IMAGE_UPLOAD_URL  : overrides `media.upload_url`
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod codec;
mod classify;
mod assemble;
mod draft;
mod decompose;
mod error;
mod store;
mod reconcile;
mod media;
mod config;
mod seeds;
mod state;
mod protocol;
mod logic;
mod routes;
#[cfg(test)]
mod test_support;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (config, seeded store, image uploader).
  let state = Arc::new(AppState::new());

  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quizgroup_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
