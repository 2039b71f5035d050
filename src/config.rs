//! Engine configuration.
//!
//! One sub-config per stage (comparators, wedge, storage, scheduler), each
//! with serde support, a `Default` impl, and explicit validation. A whole
//! run can be driven from a single YAML file:
//!
//! ```yaml
//! comparators:
//!   memo_capacity: 16384
//!   weights:
//!     - { id: "name", weight: 1.0 }
//!     - { id: "coauthors", weight: 0.5 }
//!     - { id: "keywords", weight: 0.25 }
//!     - { id: "collaboration", weight: 0.25 }
//!
//! wedge:
//!   threshold: 0.8
//!
//! storage:
//!   matrix_dir: "ande-data/matrix"
//!   cost_log: "ande-data/cost.log"
//!
//! scheduler:
//!   workers: 4
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Comparator ids the pipeline knows how to build.
pub const KNOWN_COMPARATORS: &[&str] = &["name", "coauthors", "keywords", "collaboration"];

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// One `{comparator id, weight}` pair of the pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparatorWeight {
    pub id: String,
    pub weight: f64,
}

/// Comparator set and memoization bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparatorsConfig {
    /// Active comparators and their weights. Weights are relative: the
    /// combiner normalizes by the evaluated subset.
    #[serde(default = "default_weights")]
    pub weights: Vec<ComparatorWeight>,

    /// Upper bound on memoized verdicts per pipeline instance. The memo
    /// is per worker and cleared between groups.
    #[serde(default = "default_memo_capacity")]
    pub memo_capacity: usize,
}

fn default_weights() -> Vec<ComparatorWeight> {
    let weight = |id: &str, weight: f64| ComparatorWeight {
        id: id.to_string(),
        weight,
    };
    vec![
        weight("name", 1.0),
        weight("coauthors", 0.5),
        weight("keywords", 0.25),
        weight("collaboration", 0.25),
    ]
}

fn default_memo_capacity() -> usize {
    16_384
}

impl Default for ComparatorsConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            memo_capacity: default_memo_capacity(),
        }
    }
}

impl ComparatorsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.weights.is_empty() {
            return Err(ConfigError::Validation(
                "at least one comparator must be configured".into(),
            ));
        }
        let mut seen = HashSet::new();
        for entry in &self.weights {
            if !KNOWN_COMPARATORS.contains(&entry.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "unknown comparator id '{}'",
                    entry.id
                )));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "comparator '{}' configured twice",
                    entry.id
                )));
            }
            if !entry.weight.is_finite() || entry.weight <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "comparator '{}' needs a positive finite weight, got {}",
                    entry.id, entry.weight
                )));
            }
        }
        if self.memo_capacity == 0 {
            return Err(ConfigError::Validation(
                "memo_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Wedge decision parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WedgeConfig {
    /// Merge two clusters when the bidirectional compatibility sum
    /// exceeds this. Read once at run start; both directional scores are
    /// capped at 0.5, so values above 1.0 can never merge anything.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.8
}

impl Default for WedgeConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

impl WedgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold > 1.0 {
            return Err(ConfigError::Validation(format!(
                "wedge threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Where the engine keeps the artifacts it owns: per-group matrix files,
/// the scheduler cost log, and (optionally) per-group result reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_matrix_dir")]
    pub matrix_dir: PathBuf,

    #[serde(default = "default_cost_log")]
    pub cost_log: PathBuf,

    /// When set, each group's final clustering is also written under this
    /// directory as JSON, sharded like the matrix files.
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
}

fn default_matrix_dir() -> PathBuf {
    PathBuf::from("ande-data/matrix")
}

fn default_cost_log() -> PathBuf {
    PathBuf::from("ande-data/cost.log")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            matrix_dir: default_matrix_dir(),
            cost_log: default_cost_log(),
            results_dir: None,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Validation(
                "scheduler needs at least one worker".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for a disambiguation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub comparators: ComparatorsConfig,
    #[serde(default)]
    pub wedge: WedgeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Load a YAML configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.comparators.validate()?;
        self.wedge.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EngineConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg = EngineConfig::from_yaml("wedge:\n  threshold: 0.6\n").unwrap();
        assert_eq!(cfg.wedge.threshold, 0.6);
        assert_eq!(cfg.scheduler.workers, default_workers());
        assert_eq!(cfg.comparators.weights.len(), 4);
    }

    #[test]
    fn rejects_unknown_comparator() {
        let cfg = EngineConfig {
            comparators: ComparatorsConfig {
                weights: vec![ComparatorWeight {
                    id: "astrology".into(),
                    weight: 1.0,
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_non_positive_weight() {
        let cfg = EngineConfig {
            comparators: ComparatorsConfig {
                weights: vec![ComparatorWeight {
                    id: "name".into(),
                    weight: 0.0,
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let cfg = EngineConfig {
            wedge: WedgeConfig { threshold: 1.5 },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let cfg = EngineConfig {
            scheduler: SchedulerConfig { workers: 0 },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
