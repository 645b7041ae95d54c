//! Runtime configuration for kv-cache-compact.
//!
//! Configuration can be loaded from a JSON file or constructed
//! programmatically. The compaction knobs (retention ratio, activation
//! threshold, skip list) live here, together with the synthetic workload
//! shape used by the demo driver.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::cache::error::CompactionError;

/// Default activation threshold: layers shorter than this are left alone.
pub const DEFAULT_PRUNE_AFTER: usize = 2048;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "kv-cache-compact", about = "Norm-ranked KV-cache compaction driver")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Override the retention ratio from the config file.
    #[arg(long)]
    pub keep_ratio: Option<f64>,

    /// Override the activation threshold from the config file.
    #[arg(long)]
    pub prune_after: Option<usize>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workload shape for the demo driver.
    pub model: ModelConfig,

    /// Compaction tuning.
    pub compaction: CompactionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

/// Model-related settings describing the cache shape the driver synthesizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of layers in the model.
    pub n_layers: usize,

    /// Number of KV heads (for GQA/MQA).
    pub n_kv_heads: usize,

    /// Head dimension.
    pub head_dim: usize,

    /// Batch size.
    pub batch_size: usize,

    /// Cached tokens per layer before compaction.
    pub seq_len: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_layers: 40,
            n_kv_heads: 8,
            head_dim: 128,
            batch_size: 1,
            seq_len: 4096,
        }
    }
}

/// Compaction tuning for one invocation of the compactor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Fraction of tokens to retain per compacted layer, in (0, 1].
    /// 1.0 leaves every layer untouched.
    pub keep_ratio: f64,

    /// Layers shorter than this many tokens are passed through unmodified.
    /// The comparison is strict: a layer exactly this long is compacted.
    pub prune_after: usize,

    /// Layer indices exempted from compaction regardless of length.
    /// Out-of-range indices are simply never matched.
    pub skip_layers: HashSet<usize>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            keep_ratio: 1.0,
            prune_after: DEFAULT_PRUNE_AFTER,
            skip_layers: HashSet::new(),
        }
    }
}

impl CompactionConfig {
    /// Reject retention ratios outside (0, 1] (NaN included).
    pub fn validate(&self) -> Result<(), CompactionError> {
        if !self.keep_ratio.is_finite() || self.keep_ratio <= 0.0 || self.keep_ratio > 1.0 {
            return Err(CompactionError::InvalidKeepRatio(self.keep_ratio));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file is missing.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Size of the synthesized cache in bytes (FP32, both K and V, all layers).
    pub fn cache_bytes(&self) -> usize {
        let per_layer = self.model.batch_size
            * self.model.n_kv_heads
            * self.model.seq_len
            * self.model.head_dim
            * std::mem::size_of::<f32>()
            * 2;
        per_layer * self.model.n_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.compaction.keep_ratio, 1.0);
        assert_eq!(cfg.compaction.prune_after, DEFAULT_PRUNE_AFTER);
        assert!(cfg.compaction.skip_layers.is_empty());
        assert!(cfg.compaction.validate().is_ok());
    }

    #[test]
    fn test_keep_ratio_bounds() {
        let mut cfg = CompactionConfig::default();

        cfg.keep_ratio = 0.0;
        assert!(cfg.validate().is_err());
        cfg.keep_ratio = -0.3;
        assert!(cfg.validate().is_err());
        cfg.keep_ratio = 1.5;
        assert!(cfg.validate().is_err());
        cfg.keep_ratio = f64::NAN;
        assert!(cfg.validate().is_err());

        cfg.keep_ratio = 0.001;
        assert!(cfg.validate().is_ok());
        cfg.keep_ratio = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut cfg = Config::default();
        cfg.compaction.keep_ratio = 0.6;
        cfg.compaction.skip_layers.insert(0);

        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.compaction.keep_ratio, 0.6);
        assert!(back.compaction.skip_layers.contains(&0));
    }

    #[test]
    fn test_cache_bytes() {
        let cfg = Config::default();
        // batch(1) * heads(8) * seq(4096) * dim(128) * 4 bytes * 2(K+V) * layers(40)
        let expected = 8 * 4096 * 128 * 4 * 2 * 40;
        assert_eq!(cfg.cache_bytes(), expected);
    }
}
