//! Benchmark configuration: defaults, file loading and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codec::CompressionAlgorithm;
use crate::error::{BenchError, BenchResult};
use crate::strategy::{default_tiers, CompressionTier, StrategyTable, MAX_LEVEL};

/// Benchmark configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Passes over the input file set.
    pub test_runs: usize,
    /// Directory whose regular files are benchmarked.
    pub test_files_dir: PathBuf,
    /// Remote collection all benchmark objects are written under.
    pub remote_root: String,
    /// Probe payload size, MB.
    pub probe_size_mb: f64,
    /// Probe samples to average.
    pub probe_samples: usize,
    /// Compare SHA-256 of original and final file.
    pub enable_verification: bool,
    /// Attach compression metadata to uploaded objects.
    pub enable_metadata: bool,
    /// Probe the network and pick levels per file.
    pub enable_adaptive_compression: bool,
    /// Sweep stale benchmark objects before and after the run.
    pub enable_cleanup: bool,
    /// Level used when adaptive compression is off; `None` means no compression.
    pub fixed_level: Option<i32>,
    /// Codec used for every compressed artifact.
    pub codec: CompressionAlgorithm,
    /// Abort once failed attempts exceed this share of planned attempts.
    pub max_failure_ratio: f64,
    /// Resource sampler interval, ms.
    pub sampler_interval_ms: u64,
    /// Speed tiers, highest threshold first.
    pub tiers: Vec<CompressionTier>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            test_runs: 5,
            test_files_dir: PathBuf::from("./testFiles"),
            remote_root: String::from("/tempZone/home/rods"),
            probe_size_mb: 5.0,
            probe_samples: 3,
            enable_verification: true,
            enable_metadata: true,
            enable_adaptive_compression: true,
            enable_cleanup: true,
            fixed_level: None,
            codec: CompressionAlgorithm::Zstd,
            max_failure_ratio: 0.5,
            sampler_interval_ms: 100,
            tiers: default_tiers(),
        }
    }
}

impl BenchConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> BenchResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: BenchConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| BenchError::InvalidConfig(e.to_string()))?,
            "json" => serde_json::from_str(&contents).map_err(|e| BenchError::InvalidConfig(e.to_string()))?,
            _ => {
                return Err(BenchError::InvalidConfig(format!(
                    "Unsupported config file extension: {}",
                    ext
                )))
            }
        };
        Ok(config)
    }

    /// Check value ranges and build the strategy table.
    pub fn validate(&self) -> BenchResult<StrategyTable> {
        if self.test_runs == 0 {
            return Err(BenchError::InvalidConfig("test_runs must be at least 1".into()));
        }
        if self.enable_adaptive_compression && self.probe_samples == 0 {
            return Err(BenchError::InvalidConfig("probe_samples must be at least 1".into()));
        }
        if self.enable_adaptive_compression && !(self.probe_size_mb > 0.0) {
            return Err(BenchError::InvalidConfig("probe_size_mb must be positive".into()));
        }
        if self.sampler_interval_ms == 0 {
            return Err(BenchError::InvalidConfig("sampler_interval_ms must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            return Err(BenchError::InvalidConfig(format!(
                "max_failure_ratio must be within [0, 1], got {}",
                self.max_failure_ratio
            )));
        }
        if let Some(level) = self.fixed_level {
            if !(0..=MAX_LEVEL).contains(&level) {
                return Err(BenchError::InvalidConfig(format!(
                    "fixed_level must be within 0..={}, got {}",
                    MAX_LEVEL, level
                )));
            }
        }
        if !self.remote_root.starts_with('/') {
            return Err(BenchError::InvalidConfig(format!(
                "remote_root must be absolute, got {}",
                self.remote_root
            )));
        }
        StrategyTable::new(self.tiers.clone())
    }
}
