//! Network-aware compression level selection.
//!
//! The tier table and the per-level throughput estimates are immutable values
//! handed to [`StrategySelector`]; nothing here reads process-wide state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BenchError, BenchResult};

/// Bytes per MB as used for all speed and size math.
pub const MIB: f64 = 1024.0 * 1024.0;

/// Lowest and highest level the selector will ever return.
pub const MIN_LEVEL: i32 = 1;
/// See [`MIN_LEVEL`].
pub const MAX_LEVEL: i32 = 22;

/// Assumed decompression throughput for benefit estimates, MB/s.
pub const DECOMPRESSION_MBPS: f64 = 1500.0;

/// Estimated compression throughput for a level not present in the table.
const UNKNOWN_LEVEL_MBPS: f64 = 100.0;

/// One (speed threshold, level) pair of the strategy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionTier {
    /// Short tier name, e.g. `very_fast`.
    pub name: String,
    /// Minimum measured speed (MB/s) for this tier to apply.
    pub min_speed_mbps: f64,
    /// Compression level used by this tier.
    pub level: i32,
    /// Why this level suits the tier.
    pub rationale: String,
}

impl CompressionTier {
    /// Build a tier.
    pub fn new(name: &str, min_speed_mbps: f64, level: i32, rationale: &str) -> Self {
        Self {
            name: name.to_string(),
            min_speed_mbps,
            level,
            rationale: rationale.to_string(),
        }
    }
}

/// Default tier table: faster network, cheaper compression.
pub fn default_tiers() -> Vec<CompressionTier> {
    vec![
        CompressionTier::new("very_fast", 100.0, 1, "Very fast network (>100 MB/s): minimal compression"),
        CompressionTier::new("fast", 50.0, 3, "Fast network (50-100 MB/s): light compression"),
        CompressionTier::new("medium", 10.0, 6, "Medium network (10-50 MB/s): balanced compression"),
        CompressionTier::new("slow", 1.0, 9, "Slow network (1-10 MB/s): high compression"),
        CompressionTier::new("very_slow", 0.0, 15, "Very slow network (<1 MB/s): maximum compression"),
    ]
}

/// Default estimated zstd compression throughput per level, MB/s.
pub fn default_level_throughput() -> BTreeMap<i32, f64> {
    BTreeMap::from([(1, 500.0), (3, 200.0), (6, 100.0), (9, 40.0), (15, 10.0)])
}

/// Validated, descending tier table.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyTable {
    tiers: Vec<CompressionTier>,
}

impl StrategyTable {
    /// Validate and wrap a tier table.
    ///
    /// Thresholds must be strictly descending and the last tier must accept 0 MB/s,
    /// so every non-negative speed maps to exactly one tier.
    pub fn new(tiers: Vec<CompressionTier>) -> BenchResult<Self> {
        if tiers.is_empty() {
            return Err(BenchError::InvalidConfig("tier table is empty".into()));
        }
        for pair in tiers.windows(2) {
            if pair[1].min_speed_mbps >= pair[0].min_speed_mbps {
                return Err(BenchError::InvalidConfig(format!(
                    "tier thresholds must be strictly descending: {} ({}) before {} ({})",
                    pair[0].name, pair[0].min_speed_mbps, pair[1].name, pair[1].min_speed_mbps
                )));
            }
        }
        for tier in &tiers {
            if !(MIN_LEVEL..=MAX_LEVEL).contains(&tier.level) {
                return Err(BenchError::InvalidConfig(format!(
                    "tier {} has level {} outside {}..={}",
                    tier.name, tier.level, MIN_LEVEL, MAX_LEVEL
                )));
            }
        }
        let floor = tiers.last().map(|t| t.min_speed_mbps).unwrap_or(f64::NAN);
        if floor != 0.0 {
            return Err(BenchError::InvalidConfig(format!(
                "last tier must have a 0 MB/s threshold, found {}",
                floor
            )));
        }
        Ok(Self { tiers })
    }

    /// Tiers, highest threshold first.
    pub fn tiers(&self) -> &[CompressionTier] {
        &self.tiers
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
        }
    }
}

/// The tier picked for a measured speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSelection {
    /// Speed the decision was made on, MB/s.
    pub speed_mbps: f64,
    /// Matching tier.
    pub tier: CompressionTier,
}

impl TierSelection {
    /// Base compression level.
    pub fn level(&self) -> i32 {
        self.tier.level
    }
}

/// Predicted outcome of compressing a file at one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelBenefit {
    /// Compression level.
    pub level: i32,
    /// Predicted compress + transfer + decompress time, seconds.
    pub total_time_secs: f64,
    /// Seconds saved versus an uncompressed upload + download.
    pub time_saved_secs: f64,
    /// True when compression beats the uncompressed transfer.
    pub worthwhile: bool,
}

/// Maps network speed and file size to compression levels.
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    table: StrategyTable,
    throughput: LevelThroughput,
}

/// Per-level compression throughput estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelThroughput(BTreeMap<i32, f64>);

impl Default for LevelThroughput {
    fn default() -> Self {
        Self(default_level_throughput())
    }
}

impl LevelThroughput {
    /// Wrap a custom estimate table.
    pub fn new(map: BTreeMap<i32, f64>) -> Self {
        Self(map)
    }

    /// Estimated MB/s for `level`; 100 MB/s when the level is not tabulated.
    pub fn estimate(&self, level: i32) -> f64 {
        self.0.get(&level).copied().unwrap_or(UNKNOWN_LEVEL_MBPS)
    }

    /// Iterate tabulated (level, MB/s) pairs in level order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, f64)> + '_ {
        self.0.iter().map(|(l, s)| (*l, *s))
    }
}

impl StrategySelector {
    /// Create a selector over an explicit table and throughput estimates.
    pub fn new(table: StrategyTable, throughput: LevelThroughput) -> Self {
        Self { table, throughput }
    }

    /// The tier table in use.
    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    /// First tier, scanning from the highest threshold down, whose threshold `speed` meets.
    pub fn select_tier(&self, avg_speed_mbps: f64) -> TierSelection {
        let tiers = self.table.tiers();
        let tier = tiers
            .iter()
            .find(|t| avg_speed_mbps >= t.min_speed_mbps)
            // NaN or negative speeds fall through every comparison
            .unwrap_or(&tiers[tiers.len() - 1]);
        TierSelection {
            speed_mbps: avg_speed_mbps,
            tier: tier.clone(),
        }
    }

    /// Base compression level for a measured network speed.
    pub fn select_base_level(&self, avg_speed_mbps: f64) -> i32 {
        self.select_tier(avg_speed_mbps).level()
    }

    /// Refine the base level for one file.
    ///
    /// Adjustments apply in a fixed order: size rule, large-file speed rule,
    /// throughput guard, range clamp. Reordering changes results at tier edges.
    pub fn select_file_level(&self, file_size_bytes: u64, avg_speed_mbps: f64, base_level: i32) -> i32 {
        let size_mb = file_size_bytes as f64 / MIB;
        let mut level = base_level;

        if size_mb < 1.0 {
            level = level.min(1);
        } else if size_mb < 10.0 {
            level = (level - 2).max(1);
        } else if size_mb > 100.0 {
            if avg_speed_mbps < 10.0 {
                level = (level + 2).min(15);
            } else if avg_speed_mbps < 50.0 {
                level = (level + 1).min(9);
            }
        }

        if self.bottlenecks(level, avg_speed_mbps) {
            for candidate in [6, 3] {
                if level > candidate {
                    level = candidate;
                    if !self.bottlenecks(level, avg_speed_mbps) {
                        break;
                    }
                }
            }
        }

        let level = level.clamp(MIN_LEVEL, MAX_LEVEL);
        debug!(file_size_bytes, avg_speed_mbps, base_level, level, "file level selected");
        level
    }

    /// True when compressing at `level` would be slower than half the network speed.
    fn bottlenecks(&self, level: i32, speed_mbps: f64) -> bool {
        self.throughput.estimate(level) < speed_mbps * 0.5
    }

    /// Predict, per tabulated level, whether compression pays off for a file.
    ///
    /// `compression_ratio_percent` is the expected size reduction (0..100).
    pub fn estimate_benefit(
        &self,
        avg_speed_mbps: f64,
        file_size_mb: f64,
        compression_ratio_percent: f64,
    ) -> Vec<LevelBenefit> {
        if avg_speed_mbps <= 0.0 {
            return Vec::new();
        }
        let uncompressed = file_size_mb * 2.0 / avg_speed_mbps;
        let compressed_mb = file_size_mb * (1.0 - compression_ratio_percent / 100.0);
        self.throughput
            .iter()
            .map(|(level, comp_speed)| {
                let total = file_size_mb / comp_speed
                    + compressed_mb * 2.0 / avg_speed_mbps
                    + compressed_mb / DECOMPRESSION_MBPS;
                let saved = uncompressed - total;
                LevelBenefit {
                    level,
                    total_time_secs: total,
                    time_saved_secs: saved,
                    worthwhile: saved > 0.0,
                }
            })
            .collect()
    }
}
