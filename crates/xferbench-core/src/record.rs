//! Per-attempt transfer record

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategy::MIB;

/// One verified round trip of one file in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// 1-based run number.
    pub run_index: usize,
    /// Base name of the input file.
    pub filename: String,
    /// Input file size, bytes.
    pub original_size: u64,
    /// Bytes actually uploaded and downloaded.
    pub transferred_size: u64,
    /// Level used, 0 for uncompressed.
    pub compression_level: i32,
    /// Size reduction in percent, `(1 - transferred/original) * 100`.
    pub compression_ratio: f64,
    /// Time to produce the upload artifact.
    #[serde(with = "secs_f64")]
    pub compress_time: Duration,
    /// Time of the put.
    #[serde(with = "secs_f64")]
    pub upload_time: Duration,
    /// Time of the get.
    #[serde(with = "secs_f64")]
    pub download_time: Duration,
    /// Time to restore the original, zero when uncompressed.
    #[serde(with = "secs_f64")]
    pub decompress_time: Duration,
    /// Upload throughput over transferred bytes, MB/s.
    pub throughput_up: f64,
    /// Download throughput over transferred bytes, MB/s.
    pub throughput_down: f64,
}

impl TransferRecord {
    /// Compress + upload + download + decompress.
    pub fn round_trip_time(&self) -> Duration {
        self.compress_time + self.upload_time + self.download_time + self.decompress_time
    }
}

/// Percent size reduction; 0 for empty originals.
pub fn compression_ratio(original: u64, transferred: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - transferred as f64 / original as f64) * 100.0
}

/// MB/s for `bytes` moved in `elapsed`; 0 when no time was measured.
pub fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / MIB / secs
    } else {
        0.0
    }
}

/// Serialize a [`Duration`] as floating point seconds.
pub mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as seconds.
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    /// Deserialize from seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
