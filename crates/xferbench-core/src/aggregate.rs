//! Summary statistics over verified transfer records.
//!
//! Pure reductions: nothing here mutates its input or keeps state between calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::record::{secs_f64, TransferRecord};

/// Per-file breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    /// Base name of the input file.
    pub filename: String,
    /// Input size of the first record seen for this file.
    pub original_size: u64,
    /// Verified runs for this file.
    pub runs: usize,
    /// Mean transferred (compressed) size, bytes.
    pub avg_transferred_size: f64,
    /// Mean size reduction, percent.
    pub avg_compression_ratio: f64,
    /// Mean upload time.
    #[serde(with = "secs_f64")]
    pub avg_upload_time: Duration,
    /// Mean download time.
    #[serde(with = "secs_f64")]
    pub avg_download_time: Duration,
    /// Levels used across runs, in first-seen order.
    pub levels: Vec<i32>,
}

/// Totals and averages over a non-empty record set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Number of verified records.
    pub total_runs: usize,
    /// File names in first-seen order.
    pub files_tested: Vec<String>,
    /// Sum of original sizes, bytes.
    pub total_original_bytes: u64,
    /// Sum of transferred sizes, bytes.
    pub total_transferred_bytes: u64,
    /// Sum of upload times.
    #[serde(with = "secs_f64")]
    pub total_upload_time: Duration,
    /// Sum of download times.
    #[serde(with = "secs_f64")]
    pub total_download_time: Duration,
    /// Sum of compression times.
    #[serde(with = "secs_f64")]
    pub total_compress_time: Duration,
    /// Sum of decompression times.
    #[serde(with = "secs_f64")]
    pub total_decompress_time: Duration,
    /// Mean upload time.
    #[serde(with = "secs_f64")]
    pub avg_upload_time: Duration,
    /// Mean download time.
    #[serde(with = "secs_f64")]
    pub avg_download_time: Duration,
    /// Mean compression time.
    #[serde(with = "secs_f64")]
    pub avg_compress_time: Duration,
    /// Mean decompression time.
    #[serde(with = "secs_f64")]
    pub avg_decompress_time: Duration,
    /// Mean upload throughput, MB/s.
    pub avg_upload_throughput: f64,
    /// Mean download throughput, MB/s.
    pub avg_download_throughput: f64,
    /// Mean size reduction, percent.
    pub avg_compression_ratio: f64,
    /// Per-file breakdown in first-seen order.
    pub per_file: Vec<FileStats>,
}

impl AggregateStats {
    /// Sum of all four phases over every record.
    pub fn total_round_trip_time(&self) -> Duration {
        self.total_compress_time + self.total_upload_time + self.total_download_time + self.total_decompress_time
    }

    /// Mean round-trip time per record.
    pub fn avg_round_trip_time(&self) -> Duration {
        self.avg_compress_time + self.avg_upload_time + self.avg_download_time + self.avg_decompress_time
    }
}

/// Reduce records to summary statistics. `None` means no data, not zeroes.
pub fn aggregate(records: &[TransferRecord]) -> Option<AggregateStats> {
    if records.is_empty() {
        return None;
    }
    let n = records.len();
    let n32 = u32::try_from(n).unwrap_or(u32::MAX);
    let nf = n as f64;

    let sum_d = |f: fn(&TransferRecord) -> Duration| records.iter().map(f).sum::<Duration>();
    let sum_f = |f: fn(&TransferRecord) -> f64| records.iter().map(f).sum::<f64>();

    let total_upload_time = sum_d(|r| r.upload_time);
    let total_download_time = sum_d(|r| r.download_time);
    let total_compress_time = sum_d(|r| r.compress_time);
    let total_decompress_time = sum_d(|r| r.decompress_time);

    let per_file = group_by_file(records);

    Some(AggregateStats {
        total_runs: n,
        files_tested: per_file.iter().map(|f| f.filename.clone()).collect(),
        total_original_bytes: records.iter().map(|r| r.original_size).sum(),
        total_transferred_bytes: records.iter().map(|r| r.transferred_size).sum(),
        total_upload_time,
        total_download_time,
        total_compress_time,
        total_decompress_time,
        avg_upload_time: total_upload_time / n32,
        avg_download_time: total_download_time / n32,
        avg_compress_time: total_compress_time / n32,
        avg_decompress_time: total_decompress_time / n32,
        avg_upload_throughput: sum_f(|r| r.throughput_up) / nf,
        avg_download_throughput: sum_f(|r| r.throughput_down) / nf,
        avg_compression_ratio: sum_f(|r| r.compression_ratio) / nf,
        per_file,
    })
}

fn group_by_file(records: &[TransferRecord]) -> Vec<FileStats> {
    let mut order: Vec<&str> = Vec::new();
    for r in records {
        if !order.contains(&r.filename.as_str()) {
            order.push(&r.filename);
        }
    }

    order
        .into_iter()
        .map(|name| {
            let group: Vec<&TransferRecord> = records.iter().filter(|r| r.filename == name).collect();
            let k = group.len();
            let kf = k as f64;
            let k32 = u32::try_from(k).unwrap_or(u32::MAX);
            let mut levels = Vec::new();
            for r in &group {
                if !levels.contains(&r.compression_level) {
                    levels.push(r.compression_level);
                }
            }
            FileStats {
                filename: name.to_string(),
                original_size: group[0].original_size,
                runs: k,
                avg_transferred_size: group.iter().map(|r| r.transferred_size as f64).sum::<f64>() / kf,
                avg_compression_ratio: group.iter().map(|r| r.compression_ratio).sum::<f64>() / kf,
                avg_upload_time: group.iter().map(|r| r.upload_time).sum::<Duration>() / k32,
                avg_download_time: group.iter().map(|r| r.download_time).sum::<Duration>() / k32,
                levels,
            }
        })
        .collect()
}

/// Side-by-side result of an uncompressed and an adaptive benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Mean round trip without compression.
    #[serde(with = "secs_f64")]
    pub baseline_avg_round_trip: Duration,
    /// Mean round trip with adaptive compression.
    #[serde(with = "secs_f64")]
    pub adaptive_avg_round_trip: Duration,
    /// `baseline / adaptive`; above 1 means compression helped.
    pub speedup: f64,
    /// Mean seconds saved per round trip, negative when compression cost time.
    pub time_saved_secs: f64,
    /// Bytes not sent thanks to compression, per record on average.
    pub avg_bytes_saved: f64,
}

impl Comparison {
    /// Compare two aggregates of the same file set.
    pub fn between(baseline: &AggregateStats, adaptive: &AggregateStats) -> Self {
        let base = baseline.avg_round_trip_time();
        let adapt = adaptive.avg_round_trip_time();
        let speedup = if adapt.is_zero() {
            0.0
        } else {
            base.as_secs_f64() / adapt.as_secs_f64()
        };
        let per = |s: &AggregateStats| s.total_transferred_bytes as f64 / s.total_runs as f64;
        Self {
            baseline_avg_round_trip: base,
            adaptive_avg_round_trip: adapt,
            speedup,
            time_saved_secs: base.as_secs_f64() - adapt.as_secs_f64(),
            avg_bytes_saved: per(baseline) - per(adaptive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(run: usize, name: &str, original: u64, transferred: u64, level: i32, up_ms: u64) -> TransferRecord {
        TransferRecord {
            run_index: run,
            filename: name.to_string(),
            original_size: original,
            transferred_size: transferred,
            compression_level: level,
            compression_ratio: crate::record::compression_ratio(original, transferred),
            compress_time: Duration::from_millis(10),
            upload_time: Duration::from_millis(up_ms),
            download_time: Duration::from_millis(up_ms / 2),
            decompress_time: Duration::from_millis(5),
            throughput_up: 10.0,
            throughput_down: 20.0,
        }
    }

    #[test]
    fn test_empty_is_none() {
        assert!(aggregate(&[]).is_none());
    }

    #[test]
    fn test_single_record_averages_equal_fields() {
        let r = rec(1, "a.bin", 1000, 400, 6, 300);
        let stats = aggregate(std::slice::from_ref(&r)).unwrap();
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.avg_upload_time, r.upload_time);
        assert_eq!(stats.avg_download_time, r.download_time);
        assert_eq!(stats.avg_compress_time, r.compress_time);
        assert_eq!(stats.avg_decompress_time, r.decompress_time);
        assert_eq!(stats.avg_upload_throughput, r.throughput_up);
        assert_eq!(stats.avg_download_throughput, r.throughput_down);
        assert_eq!(stats.avg_compression_ratio, r.compression_ratio);
        let file = &stats.per_file[0];
        assert_eq!(file.avg_transferred_size, 400.0);
        assert_eq!(file.avg_compression_ratio, r.compression_ratio);
        assert_eq!(file.avg_upload_time, r.upload_time);
        assert_eq!(stats.avg_round_trip_time(), r.round_trip_time());
    }

    #[test]
    fn test_grouping_preserves_first_seen_order() {
        let records = vec![
            rec(1, "z.bin", 100, 50, 6, 100),
            rec(1, "a.bin", 200, 200, 1, 200),
            rec(2, "z.bin", 100, 30, 9, 300),
            rec(2, "a.bin", 200, 100, 1, 400),
        ];
        let stats = aggregate(&records).unwrap();
        assert_eq!(stats.files_tested, vec!["z.bin", "a.bin"]);
        assert_eq!(stats.total_runs, 4);
        assert_eq!(stats.total_upload_time, Duration::from_millis(1000));
        assert_eq!(stats.avg_upload_time, Duration::from_millis(250));
        assert_eq!(stats.total_original_bytes, 600);
        assert_eq!(stats.total_transferred_bytes, 380);

        let z = &stats.per_file[0];
        assert_eq!(z.runs, 2);
        assert_eq!(z.avg_transferred_size, 40.0);
        assert_eq!(z.avg_compression_ratio, 60.0);
        assert_eq!(z.avg_upload_time, Duration::from_millis(200));
        assert_eq!(z.levels, vec![6, 9]);
        assert_eq!(stats.per_file[1].levels, vec![1]);
    }

    #[test]
    fn test_aggregate_is_repeatable() {
        let records = vec![rec(1, "a", 10, 5, 3, 10), rec(2, "a", 10, 6, 3, 20)];
        assert_eq!(aggregate(&records), aggregate(&records));
    }

    #[test]
    fn test_comparison() {
        let baseline = aggregate(&[rec(1, "a", 1000, 1000, 0, 1000)]).unwrap();
        let adaptive = aggregate(&[rec(1, "a", 1000, 250, 6, 200)]).unwrap();
        let cmp = Comparison::between(&baseline, &adaptive);
        assert!(cmp.speedup > 1.0);
        assert!(cmp.time_saved_secs > 0.0);
        assert_eq!(cmp.avg_bytes_saved, 750.0);
    }
}
