//! Loading service configuration from TOML.
//!
//! Every field has a default, so an absent or partial file is fine:
//!
//! ```toml
//! seed_demo_data = true
//!
//! [engine]
//! english_subject_code = "EN"
//! max_in_flight = 4
//!
//! [storage]
//! op_timeout_ms = 5000
//!
//! [media]
//! upload_url = "https://media.example.org/upload"
//! timeout_ms = 10000
//! ```

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::classify::DEFAULT_ENGLISH_SUBJECT;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  pub engine: EngineConfig,
  pub storage: StorageConfig,
  pub media: MediaConfig,
  /// Load the built-in demo records into the memory store at startup.
  pub seed_demo_data: bool,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      engine: EngineConfig::default(),
      storage: StorageConfig::default(),
      media: MediaConfig::default(),
      seed_demo_data: true,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Subject code whose records may be matching/cloze/reading without siblings.
  pub english_subject_code: String,
  /// Concurrent create/update calls per reconciliation.
  pub max_in_flight: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self { english_subject_code: DEFAULT_ENGLISH_SUBJECT.into(), max_in_flight: 4 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub op_timeout_ms: u64,
}

impl Default for StorageConfig {
  fn default() -> Self { Self { op_timeout_ms: 5_000 } }
}

impl StorageConfig {
  pub fn op_timeout(&self) -> Duration { Duration::from_millis(self.op_timeout_ms) }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
  /// No URL means every image is stored inline.
  pub upload_url: Option<String>,
  pub timeout_ms: u64,
}

impl Default for MediaConfig {
  fn default() -> Self { Self { upload_url: None, timeout_ms: 10_000 } }
}

impl MediaConfig {
  pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
}

pub fn parse_config(s: &str) -> Result<ServiceConfig, toml::de::Error> {
  toml::from_str::<ServiceConfig>(s)
}

/// Attempt to load `ServiceConfig` from QUIZ_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<ServiceConfig> {
  let path = std::env::var("QUIZ_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "quizgroup_backend", %path, "Loaded service config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizgroup_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizgroup_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

/// File config (or defaults) with environment overrides applied.
pub fn resolve_config() -> ServiceConfig {
  let mut cfg = load_config_from_env().unwrap_or_default();
  if let Ok(url) = std::env::var("IMAGE_UPLOAD_URL") {
    cfg.media.upload_url = Some(url);
  }
  cfg
}
