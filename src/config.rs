//! Loading service configuration from TOML, with environment overrides.
//!
//! Schema (all keys optional):
//!
//! ```toml
//! storage_root = "./data"
//! slot_count = 6
//!
//! [remote]
//! document_store_url = "https://docs.example.com/v1"
//! object_storage_url = "https://bucket.example.com"
//! api_key = "..."
//! timeout_secs = 20
//! ```

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info, warn};

pub const DEFAULT_SLOT_COUNT: usize = 6;
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Clone, Debug, Deserialize)]
pub struct StoryConfig {
  #[serde(default = "default_storage_root")]
  pub storage_root: PathBuf,
  #[serde(default = "default_slot_count")]
  pub slot_count: usize,
  #[serde(default)]
  pub remote: RemoteConfig,
}

/// Remote collaborators. Leaving both URLs unset gives a local-only deployment.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteConfig {
  #[serde(default)] pub document_store_url: Option<String>,
  #[serde(default)] pub object_storage_url: Option<String>,
  #[serde(default)] pub api_key: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_storage_root() -> PathBuf { PathBuf::from("./data") }
fn default_slot_count() -> usize { DEFAULT_SLOT_COUNT }
fn default_timeout_secs() -> u64 { DEFAULT_TIMEOUT_SECS }

impl Default for RemoteConfig {
  fn default() -> Self {
    Self { document_store_url: None, object_storage_url: None, api_key: None, timeout_secs: DEFAULT_TIMEOUT_SECS }
  }
}

impl Default for StoryConfig {
  fn default() -> Self {
    Self { storage_root: default_storage_root(), slot_count: DEFAULT_SLOT_COUNT, remote: RemoteConfig::default() }
  }
}

impl StoryConfig {
  /// Parse a TOML document.
  pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
    toml::from_str::<StoryConfig>(s)
  }

  /// Apply environment overrides on top of whatever was loaded.
  fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(root) = var("STORAGE_ROOT") {
      self.storage_root = PathBuf::from(root);
    }
    if let Some(n) = var("SLOT_COUNT") {
      match n.parse::<usize>() {
        Ok(n) if n > 0 => self.slot_count = n,
        _ => warn!(target: "story_vault", value = %n, "Ignoring invalid SLOT_COUNT"),
      }
    }
    if let Some(url) = var("DOCUMENT_STORE_URL") {
      self.remote.document_store_url = Some(url);
    }
    if let Some(url) = var("OBJECT_STORAGE_URL") {
      self.remote.object_storage_url = Some(url);
    }
    if let Some(key) = var("REMOTE_API_KEY") {
      self.remote.api_key = Some(key);
    }
    if let Some(t) = var("REMOTE_TIMEOUT_SECS") {
      match t.parse::<u64>() {
        Ok(t) if t > 0 => self.remote.timeout_secs = t,
        _ => warn!(target: "story_vault", value = %t, "Ignoring invalid REMOTE_TIMEOUT_SECS"),
      }
    }
    if self.slot_count == 0 {
      self.slot_count = DEFAULT_SLOT_COUNT;
    }
  }
}

/// Load from `STORY_CONFIG_PATH` when set, then apply env overrides.
/// Read or parse errors are logged and defaults are used.
pub fn load_story_config_from_env() -> StoryConfig {
  let mut cfg = match std::env::var("STORY_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match StoryConfig::from_toml(&s) {
        Ok(cfg) => {
          info!(target: "story_vault", %path, "Loaded story config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "story_vault", %path, error = %e, "Failed to parse TOML config");
          StoryConfig::default()
        }
      },
      Err(e) => {
        error!(target: "story_vault", %path, error = %e, "Failed to read TOML config file");
        StoryConfig::default()
      }
    },
    Err(_) => StoryConfig::default(),
  };
  cfg.apply_env(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()));
  cfg
}
