//! Throughput prober: measures upload/download speed with synthetic payloads.

use std::io::Write;
use std::time::{Duration, Instant};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{BenchError, BenchResult};
use crate::store::{join_remote, RemoteStore};
use crate::strategy::MIB;

/// Name prefix of probe objects in the remote store.
pub const PROBE_PREFIX: &str = ".speedtest_";

/// One synthetic transfer measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    /// Upload speed, MB/s.
    pub upload_mbps: f64,
    /// Download speed, MB/s.
    pub download_mbps: f64,
    /// Half the round-trip time, ms.
    pub latency_ms: f64,
}

impl SpeedSample {
    /// Derive a sample from a payload size and the two transfer times.
    pub fn from_timings(size_bytes: u64, upload: Duration, download: Duration) -> Self {
        let size_mb = size_bytes as f64 / MIB;
        let up = upload.as_secs_f64().max(f64::EPSILON);
        let down = download.as_secs_f64().max(f64::EPSILON);
        Self {
            upload_mbps: size_mb / up,
            download_mbps: size_mb / down,
            latency_ms: (upload.as_secs_f64() + download.as_secs_f64()) * 1000.0 / 2.0,
        }
    }
}

/// Mean of all successful probe samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkEstimate {
    /// Mean upload speed, MB/s.
    pub avg_upload_mbps: f64,
    /// Mean download speed, MB/s.
    pub avg_download_mbps: f64,
    /// Mean latency, ms.
    pub avg_latency_ms: f64,
    /// Number of samples averaged.
    pub samples: usize,
}

impl NetworkEstimate {
    /// Average `samples`. Fails when there are none.
    pub fn from_samples(samples: &[SpeedSample], attempted: usize) -> BenchResult<Self> {
        if samples.is_empty() {
            return Err(BenchError::NetworkUnavailable { attempted });
        }
        let n = samples.len() as f64;
        Ok(Self {
            avg_upload_mbps: samples.iter().map(|s| s.upload_mbps).sum::<f64>() / n,
            avg_download_mbps: samples.iter().map(|s| s.download_mbps).sum::<f64>() / n,
            avg_latency_ms: samples.iter().map(|s| s.latency_ms).sum::<f64>() / n,
            samples: samples.len(),
        })
    }

    /// Mean of upload and download speed; drives compression selection.
    pub fn avg_speed_mbps(&self) -> f64 {
        (self.avg_upload_mbps + self.avg_download_mbps) / 2.0
    }
}

/// Probe the store with `sample_count` payloads of `sample_size_mb` each.
///
/// Failed samples are logged and skipped. When none succeed the result is
/// [`BenchError::NetworkUnavailable`] and the caller must disable compression.
#[instrument(skip(store))]
pub async fn probe(
    store: &dyn RemoteStore,
    remote_root: &str,
    sample_size_mb: f64,
    sample_count: usize,
) -> BenchResult<NetworkEstimate> {
    let size_bytes = (sample_size_mb * MIB).round() as u64;
    let mut samples = Vec::with_capacity(sample_count);

    for i in 0..sample_count {
        match probe_once(store, remote_root, size_bytes).await {
            Ok(sample) => {
                info!(
                    sample = i + 1,
                    of = sample_count,
                    up_mbps = format_args!("{:.2}", sample.upload_mbps),
                    down_mbps = format_args!("{:.2}", sample.download_mbps),
                    latency_ms = format_args!("{:.0}", sample.latency_ms),
                    "probe sample"
                );
                samples.push(sample);
            }
            Err(e) => warn!(sample = i + 1, of = sample_count, error = %e, "probe sample failed"),
        }
    }

    let estimate = NetworkEstimate::from_samples(&samples, sample_count)?;
    info!(
        avg_up_mbps = format_args!("{:.2}", estimate.avg_upload_mbps),
        avg_down_mbps = format_args!("{:.2}", estimate.avg_download_mbps),
        avg_latency_ms = format_args!("{:.0}", estimate.avg_latency_ms),
        samples = estimate.samples,
        "network estimate"
    );
    Ok(estimate)
}

async fn probe_once(store: &dyn RemoteStore, remote_root: &str, size_bytes: u64) -> BenchResult<SpeedSample> {
    let payload = random_payload_file(size_bytes)?;
    let remote = join_remote(remote_root, &format!("{}{}.tmp", PROBE_PREFIX, uuid::Uuid::new_v4().simple()));

    let start = Instant::now();
    store.put(payload.path(), &remote, true).await?;
    let upload = start.elapsed();

    let download_file = tempfile::Builder::new().suffix(".tmp").tempfile()?;
    let start = Instant::now();
    let fetched = store.get(&remote, download_file.path(), true).await;
    let download = start.elapsed();

    if let Err(e) = store.unlink(&remote, true).await {
        warn!(remote = %remote, error = %e, "could not remove probe object");
    }
    fetched?;

    debug!(size_bytes, ?upload, ?download, "probe transfer timed");
    Ok(SpeedSample::from_timings(size_bytes, upload, download))
}

fn random_payload_file(size_bytes: u64) -> BenchResult<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".testdata").tempfile()?;
    let mut rng = rand::thread_rng();
    let mut chunk = vec![0u8; MIB as usize];
    let mut remaining = size_bytes;
    while remaining > 0 {
        let n = remaining.min(chunk.len() as u64) as usize;
        rng.fill_bytes(&mut chunk[..n]);
        file.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    file.flush()?;
    Ok(file)
}
