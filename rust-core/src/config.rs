use crate::error::ConfigError;
use crate::verdict::{CategorySet, DEFAULT_CATEGORIES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_ledger_timeout_ms")]
    pub ledger_timeout_ms: u64,
    #[serde(default = "default_category_set")]
    pub category_set: Vec<String>,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,
    #[serde(default = "default_verified_cache_capacity")]
    pub verified_cache_capacity: usize,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub lexicon: LexiconConfig,
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_dedup_window_ms() -> u64 {
    60_000
}

fn default_ledger_timeout_ms() -> u64 {
    5_000
}

fn default_category_set() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect()
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_history_page_size() -> usize {
    256
}

fn default_verified_cache_capacity() -> usize {
    65_536
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            dedup_window_ms: default_dedup_window_ms(),
            ledger_timeout_ms: default_ledger_timeout_ms(),
            category_set: default_category_set(),
            dedup_capacity: default_dedup_capacity(),
            history_page_size: default_history_page_size(),
            verified_cache_capacity: default_verified_cache_capacity(),
            node: NodeConfig::default(),
            lexicon: LexiconConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
    #[serde(default = "default_max_block_records")]
    pub max_block_records: usize,
    #[serde(default)]
    pub data_dir: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_block_interval_ms() -> u64 {
    2_000
}

fn default_max_block_records() -> usize {
    5_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            block_interval_ms: default_block_interval_ms(),
            max_block_records: default_max_block_records(),
            data_dir: None,
        }
    }
}

/// Term lists for the development classifier, keyed by category.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LexiconConfig {
    #[serde(default = "default_baseline_score")]
    pub baseline_score: f64,
    #[serde(default)]
    pub terms: BTreeMap<String, Vec<String>>,
}

fn default_baseline_score() -> f64 {
    0.05
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            baseline_score: default_baseline_score(),
            terms: BTreeMap::new(),
        }
    }
}

impl ModerationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let cfg: ModerationConfig = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.confidence_threshold.is_finite() || !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.dedup_window_ms == 0 {
            return Err(ConfigError::Invalid("dedup_window_ms must be > 0".into()));
        }
        if self.ledger_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ledger_timeout_ms must be > 0".into()));
        }
        if self.categories().is_empty() {
            return Err(ConfigError::Invalid("category_set must not be empty".into()));
        }
        if self.dedup_capacity == 0 || self.history_page_size == 0 {
            return Err(ConfigError::Invalid(
                "dedup_capacity and history_page_size must be > 0".into(),
            ));
        }
        if self.node.max_block_records == 0 {
            return Err(ConfigError::Invalid("node.max_block_records must be > 0".into()));
        }
        let b = self.lexicon.baseline_score;
        if !b.is_finite() || !(0.0..=1.0).contains(&b) {
            return Err(ConfigError::Invalid("lexicon.baseline_score outside [0, 1]".into()));
        }
        Ok(())
    }

    pub fn categories(&self) -> CategorySet {
        CategorySet::new(&self.category_set)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }
}
