//! Engine configuration schema, loaded from YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Search and evaluation settings. Every field has a default so a partial
/// file (or none at all) is enough to run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Playout budget per move; 0 means unlimited.
    #[serde(default)]
    pub playout_limit: u32,
    /// Wall-clock budget per move in milliseconds; 0 means none.
    #[serde(default)]
    pub time_limit_ms: u64,
    /// Worker threads for the search.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// PUCT exploration constant.
    #[serde(default = "default_c_puct")]
    pub c_puct: f32,
    /// Temperature of the policy softmax.
    #[serde(default = "default_softmax_temperature")]
    pub softmax_temperature: f32,
    /// Virtual-loss magnitude applied per in-flight descent.
    #[serde(default = "default_virtual_loss")]
    pub virtual_loss: u32,
    /// Hard ceiling on tree size in nodes.
    #[serde(default = "default_max_tree_nodes")]
    pub max_tree_nodes: usize,
    /// Accelerator self-check runs once per this many calls on average.
    #[serde(default = "default_self_check_probability")]
    pub self_check_probability: u32,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub analyze: bool,
    /// Root Dirichlet noise alpha (self-play exploration).
    #[serde(default = "default_dirichlet_alpha")]
    pub dirichlet_alpha: f32,
    /// Root Dirichlet mix-in fraction; 0 disables the noise.
    #[serde(default)]
    pub dirichlet_epsilon: f32,
}

fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_c_puct() -> f32 {
    1.0
}

fn default_softmax_temperature() -> f32 {
    1.0
}

fn default_virtual_loss() -> u32 {
    3
}

fn default_max_tree_nodes() -> usize {
    40_000_000
}

fn default_self_check_probability() -> u32 {
    2000
}

fn default_dirichlet_alpha() -> f32 {
    0.3
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            playout_limit: 0,
            time_limit_ms: 0,
            num_threads: default_num_threads(),
            c_puct: default_c_puct(),
            softmax_temperature: default_softmax_temperature(),
            virtual_loss: default_virtual_loss(),
            max_tree_nodes: default_max_tree_nodes(),
            self_check_probability: default_self_check_probability(),
            quiet: false,
            analyze: false,
            dirichlet_alpha: default_dirichlet_alpha(),
            dirichlet_epsilon: 0.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_partial_yaml() {
        let config = EngineConfig::from_yaml("playout_limit: 800\nc_puct: 1.5\n").unwrap();
        assert_eq!(config.playout_limit, 800);
        assert_eq!(config.c_puct, 1.5);
        assert_eq!(config.virtual_loss, 3);
        assert_eq!(config.max_tree_nodes, 40_000_000);
        assert_eq!(config.self_check_probability, 2000);
        assert_eq!(config.softmax_temperature, 1.0);
        assert!(!config.analyze);
    }

    #[test]
    fn empty_mapping_yields_defaults() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config.playout_limit, 0);
        assert_eq!(config.time_limit_ms, 0);
        assert!(config.num_threads >= 1);
        assert_eq!(config.dirichlet_epsilon, 0.0);
    }

    #[test]
    fn invalid_yaml_fails() {
        assert!(EngineConfig::from_yaml("playout_limit: [oops").is_err());
    }
}
