//! Page Annotator
//!
//! Persistent sticky notes and highlights anchored to web page elements:
//! - Portable element locators and anchor resolution
//! - Coalesced position passes with viewport-intersection gating
//! - Serialized read-modify-write persistence of per-origin records
//! - An on-page agent answering control-surface messages

pub mod agent;
pub mod anchor;
pub mod annotations;
pub mod dom;
pub mod overlay;
pub mod queue;
pub mod reconcile;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub store: StoreYamlConfig,
    pub agent: AgentYamlConfig,
}

/// Record store section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreYamlConfig {
    /// JSON file holding every origin's record
    pub path: String,
    /// Buffered change notifications per subscriber
    pub change_capacity: usize,
}

impl Default for StoreYamlConfig {
    fn default() -> Self {
        Self {
            path: "annotations.json".into(),
            change_capacity: storage::changes::DEFAULT_CAPACITY,
        }
    }
}

/// On-page agent section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentYamlConfig {
    pub frame_interval_ms: u64,
    pub visibility_margin_px: f64,
}

impl Default for AgentYamlConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: agent::DEFAULT_FRAME_INTERVAL.as_millis() as u64,
            visibility_margin_px: reconcile::DEFAULT_MARGIN_PX,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub store_path: PathBuf,
    pub change_capacity: usize,
    pub frame_interval_ms: u64,
    pub visibility_margin_px: f64,
}

impl Config {
    /// Equivalent to `from_yaml_and_env(None)`
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "annotator.yaml" in CWD.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        Ok(Self {
            store_path: std::env::var("ANNOTATOR_STORE_PATH")
                .unwrap_or(yaml.store.path)
                .into(),
            change_capacity: env_parsed("ANNOTATOR_CHANGE_CAPACITY")
                .unwrap_or(yaml.store.change_capacity)
                .max(1),
            frame_interval_ms: env_parsed("ANNOTATOR_FRAME_INTERVAL_MS")
                .unwrap_or(yaml.agent.frame_interval_ms)
                .max(1),
            visibility_margin_px: env_parsed("ANNOTATOR_VISIBILITY_MARGIN_PX")
                .unwrap_or(yaml.agent.visibility_margin_px),
        })
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("annotator.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Unparseable config, using defaults"
                    );
                    YamlConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %path.display(),
                    "No config file, using env vars / defaults"
                );
                YamlConfig::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Unreadable config, using defaults"
                );
                YamlConfig::default()
            }
        }
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// Tests
// ============================================================================
