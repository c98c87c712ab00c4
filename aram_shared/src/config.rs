//! Configuration system.
//!
//! Loads client and reference-world configuration from JSON strings/files.
//! Every field has a default, so `{}` is a valid config.

use std::path::Path;

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::physics::PhysicsConfig;

/// Client-side tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub physics: PhysicsConfig,
    /// How far behind real time remote entities are rendered.
    #[serde(default = "default_interpolation_delay_ms")]
    pub interpolation_delay_ms: f64,
    /// Remote history older than this (relative to now) is dropped.
    #[serde(default = "default_history_retention_ms")]
    pub history_retention_ms: f64,
    /// Fraction of the remaining gap closed per frame when smoothing the
    /// rendered local position toward the predicted one.
    #[serde(default = "default_correction_factor")]
    pub correction_factor: f32,
    /// Remote speed (units/s) above which an entity counts as walking.
    #[serde(default = "default_walk_speed_threshold")]
    pub walk_speed_threshold: f32,
}

fn default_interpolation_delay_ms() -> f64 {
    100.0
}

fn default_history_retention_ms() -> f64 {
    1000.0
}

fn default_correction_factor() -> f32 {
    0.2
}

fn default_walk_speed_threshold() -> f32 {
    1.0
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            physics: PhysicsConfig::default(),
            interpolation_delay_ms: default_interpolation_delay_ms(),
            history_retention_ms: default_history_retention_ms(),
            correction_factor: default_correction_factor(),
            walk_speed_threshold: default_walk_speed_threshold(),
        }
    }
}

/// Reference world tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub physics: PhysicsConfig,
    /// Number of boxes scattered by level generation.
    #[serde(default = "default_box_count")]
    pub box_count: usize,
    /// Boxes and spawn points lie within `[-extent, extent]` on X and Z.
    #[serde(default = "default_world_extent")]
    pub world_extent: f32,
    /// Seed for level generation and spawn selection.
    #[serde(default)]
    pub seed: u64,
}

fn default_box_count() -> usize {
    20
}

fn default_world_extent() -> f32 {
    50.0
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            physics: PhysicsConfig::default(),
            box_count: default_box_count(),
            world_extent: default_world_extent(),
            seed: 0,
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        load_json(path.as_ref())
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        load_json(path.as_ref())
    }
}

/// Reads and parses a JSON config file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let cfg = serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))?;
    debug!(path = %path.display(), bytes = text.len(), "Loaded config");
    Ok(cfg)
}
