//! Benchmark executor: one verified round trip per (run, file) pair.
//!
//! Each attempt walks an explicit stage sequence
//! `Prepared → Compressed → Uploaded → Transferred → Downloaded → Decompressed → Verified → Recorded`.
//! Any error moves it to [`Stage::Failed`]. Success and failure share one
//! cleanup path, which removes the scratch directory and the remote object.
//!
//! A run can be interrupted through [`Benchmark::with_cancel`]. The flag is checked
//! between stages; an interrupted attempt takes the same cleanup path and the
//! session still closes.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::{aggregate, AggregateStats};
use crate::codec::CompressionAlgorithm;
use crate::config::BenchConfig;
use crate::error::{BenchError, BenchResult};
use crate::probe::{probe, NetworkEstimate, PROBE_PREFIX};
use crate::record::{compression_ratio, throughput_mbps, TransferRecord};
use crate::store::{join_remote, RemoteStore};
use crate::strategy::{LevelThroughput, StrategySelector, TierSelection};
use crate::verify::{verify_download, verify_upload, FileFingerprint};

/// Name prefix of benchmark objects in the remote store.
pub const BENCHMARK_PREFIX: &str = "benchmark_";

/// Metadata key for the codec name.
pub const META_ALGORITHM: &str = "compression_algorithm";
/// Metadata key for the uncompressed size in bytes.
pub const META_ORIGINAL_SIZE: &str = "original_size_bytes";
/// Metadata key for the size reduction in percent.
pub const META_RATIO: &str = "compression_ratio_percent";
/// Metadata key for the compression level.
pub const META_LEVEL: &str = "compression_level";

/// Position of one attempt in the round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Original fingerprinted, nothing transferred yet
    Prepared,
    /// Upload artifact exists locally
    Compressed,
    /// Object stored remotely with the expected size
    Uploaded,
    /// Metadata attached (or skipped)
    Transferred,
    /// Object fetched back with the expected size
    Downloaded,
    /// Original bytes restored locally
    Decompressed,
    /// Restored file matches the original
    Verified,
    /// Record emitted, artifacts removed
    Recorded,
    /// Absorbing failure state
    Failed,
}

/// A regular file from the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Full local path.
    pub path: PathBuf,
    /// Base name, used in records and remote object names.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Regular files directly under `dir`, sorted by name.
pub fn collect_input_files(dir: &Path) -> BenchResult<Vec<InputFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %entry.path().display(), "skipping input file with non UTF-8 name");
            continue;
        };
        files.push(InputFile {
            path: entry.path(),
            name,
            size: meta.len(),
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Remove leftover benchmark and probe objects directly under `remote_root`.
///
/// Returns the number of objects removed. Individual unlink failures are logged and skipped.
pub async fn sweep_remote(store: &dyn RemoteStore, remote_root: &str) -> BenchResult<usize> {
    let names = store.list(remote_root).await?;
    let mut removed = 0;
    for name in names
        .iter()
        .filter(|n| n.starts_with(BENCHMARK_PREFIX) || n.starts_with(PROBE_PREFIX))
    {
        let path = join_remote(remote_root, name);
        match store.unlink(&path, true).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path, error = %e, "could not remove stale object"),
        }
    }
    if removed > 0 {
        info!(removed, remote_root, "removed stale benchmark objects");
    } else {
        debug!(remote_root, "remote root already clean");
    }
    Ok(removed)
}

/// How levels are chosen for this invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionPlan {
    /// Network estimate, absent when not probed or when probing failed.
    pub estimate: Option<NetworkEstimate>,
    /// Tier picked from the estimate.
    pub selection: Option<TierSelection>,
    /// Level before per-file refinement; 0 disables compression.
    pub base_level: i32,
    /// True when levels are refined per file from the estimate.
    pub adaptive: bool,
}

impl CompressionPlan {
    /// Every file transferred as-is.
    pub fn uncompressed() -> Self {
        Self::fixed(0)
    }

    /// Every file at `level`.
    pub fn fixed(level: i32) -> Self {
        Self {
            estimate: None,
            selection: None,
            base_level: level,
            adaptive: false,
        }
    }

    /// Level for one file of `size` bytes.
    pub fn level_for(&self, selector: &StrategySelector, size: u64) -> i32 {
        match (&self.estimate, self.adaptive && self.base_level > 0) {
            (Some(est), true) => selector.select_file_level(size, est.avg_speed_mbps(), self.base_level),
            _ => self.base_level,
        }
    }
}

/// Result of one benchmark invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkOutcome {
    /// Verified records in execution order.
    pub records: Vec<TransferRecord>,
    /// `test_runs * files`.
    pub planned: usize,
    /// Attempts started.
    pub attempted: usize,
    /// Attempts that ended in [`Stage::Failed`].
    pub failed: usize,
    /// True when the failure ratio stopped the run early.
    pub aborted: bool,
    /// True when a cancellation request stopped the run early.
    #[serde(default)]
    pub interrupted: bool,
    /// Level plan the attempts used.
    pub plan: CompressionPlan,
    /// Stale objects removed before and after the run.
    pub swept: usize,
}

impl BenchmarkOutcome {
    /// Summary statistics, `None` when no attempt succeeded.
    pub fn aggregate(&self) -> Option<AggregateStats> {
        aggregate(&self.records)
    }
}

/// Scratch state of one (run, file) attempt.
struct Attempt {
    run_index: usize,
    level: i32,
    remote_path: String,
    scratch: TempDir,
    stage: Stage,
    remote_written: bool,
}

impl Attempt {
    fn new(run_index: usize, level: i32, remote_path: String) -> BenchResult<Self> {
        Ok(Self {
            run_index,
            level,
            remote_path,
            scratch: tempfile::Builder::new().prefix("xferbench_").tempdir()?,
            stage: Stage::Prepared,
            remote_written: false,
        })
    }

    fn scratch_path(&self, name: &str) -> PathBuf {
        self.scratch.path().join(name)
    }

    fn advance(&mut self, next: Stage) {
        debug!(run = self.run_index, from = ?self.stage, to = ?next, "stage");
        self.stage = next;
    }

    /// Remove local and remote artifacts. Best effort.
    async fn cleanup(self, store: &dyn RemoteStore) {
        if self.remote_written {
            if let Err(e) = store.unlink(&self.remote_path, true).await {
                warn!(remote = %self.remote_path, error = %e, "could not remove remote artifact");
            }
        }
        if let Err(e) = self.scratch.close() {
            warn!(error = %e, "could not remove scratch directory");
        }
    }
}

/// Owns the store session for one benchmark invocation.
pub struct Benchmark {
    config: BenchConfig,
    selector: StrategySelector,
    store: Box<dyn RemoteStore>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Benchmark {
    /// Validate `config` and take ownership of the store session.
    pub fn new(config: BenchConfig, store: Box<dyn RemoteStore>) -> BenchResult<Self> {
        let table = config.validate()?;
        Ok(Self {
            config,
            selector: StrategySelector::new(table, LevelThroughput::default()),
            store,
            cancel: None,
        })
    }

    /// Stop early once `cancel` holds `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Selector built from the configured tier table.
    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    /// Borrow the store session.
    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    /// Probe the network (when adaptive) and pick the base level.
    ///
    /// A failed probe disables compression instead of failing the benchmark.
    pub async fn plan(&self) -> CompressionPlan {
        if !self.config.enable_adaptive_compression {
            let plan = CompressionPlan::fixed(self.config.fixed_level.unwrap_or(0));
            info!(level = plan.base_level, "adaptive compression disabled");
            return plan;
        }
        match probe(
            self.store(),
            &self.config.remote_root,
            self.config.probe_size_mb,
            self.config.probe_samples,
        )
        .await
        {
            Ok(estimate) => {
                let selection = self.selector.select_tier(estimate.avg_speed_mbps());
                info!(
                    tier = %selection.tier.name,
                    speed_mbps = format_args!("{:.2}", selection.speed_mbps),
                    level = selection.level(),
                    rationale = %selection.tier.rationale,
                    "compression tier selected"
                );
                CompressionPlan {
                    estimate: Some(estimate),
                    base_level: selection.level(),
                    selection: Some(selection),
                    adaptive: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "network probe failed, compression disabled");
                CompressionPlan::uncompressed()
            }
        }
    }

    /// Probe, execute every (run, file) attempt and release the session.
    ///
    /// The store is closed on every exit path.
    pub async fn run(self, files: &[InputFile]) -> BenchResult<BenchmarkOutcome> {
        let plan = if self.is_cancelled() {
            CompressionPlan::uncompressed()
        } else {
            self.plan().await
        };
        self.run_with_plan(files, plan).await
    }

    /// Like [`Benchmark::run`] with a level plan chosen by the caller.
    pub async fn run_with_plan(self, files: &[InputFile], plan: CompressionPlan) -> BenchResult<BenchmarkOutcome> {
        let result = self.execute(files, plan).await;
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "store session did not close cleanly");
        }
        result
    }

    async fn execute(&self, files: &[InputFile], plan: CompressionPlan) -> BenchResult<BenchmarkOutcome> {
        let mut swept = 0;
        if self.config.enable_cleanup {
            swept += self.sweep().await;
        }

        let planned = self.config.test_runs * files.len();
        let mut records = Vec::with_capacity(planned);
        let mut attempted = 0usize;
        let mut failed = 0usize;
        let mut aborted = false;
        let mut interrupted = false;

        info!(runs = self.config.test_runs, files = files.len(), planned, "benchmark started");

        'runs: for run_index in 1..=self.config.test_runs {
            for file in files {
                if self.is_cancelled() {
                    interrupted = true;
                    break 'runs;
                }
                let level = plan.level_for(&self.selector, file.size);
                attempted += 1;
                match self.attempt(run_index, file, level).await {
                    Err(BenchError::Interrupted) => {
                        warn!(run = run_index, file = %file.name, "attempt interrupted");
                        interrupted = true;
                        break 'runs;
                    }
                    Ok(record) => {
                        info!(
                            run = run_index,
                            file = %file.name,
                            level,
                            ratio = format_args!("{:.1}", record.compression_ratio),
                            round_trip_secs = format_args!("{:.3}", record.round_trip_time().as_secs_f64()),
                            "attempt verified"
                        );
                        records.push(record);
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(run = run_index, file = %file.name, level, failed, attempted, error = %e, "attempt failed");
                        if failed as f64 / planned as f64 > self.config.max_failure_ratio {
                            warn!(
                                failed,
                                attempted,
                                planned,
                                max_failure_ratio = self.config.max_failure_ratio,
                                "failure ratio exceeded, stopping early with partial results"
                            );
                            aborted = true;
                            break 'runs;
                        }
                    }
                }
            }
        }

        if self.config.enable_cleanup {
            swept += self.sweep().await;
        }

        if interrupted {
            warn!(succeeded = records.len(), failed, attempted, planned, "benchmark interrupted, partial results");
        } else {
            info!(succeeded = records.len(), failed, attempted, aborted, "benchmark finished");
        }
        Ok(BenchmarkOutcome {
            records,
            planned,
            attempted,
            failed,
            aborted,
            interrupted,
            plan,
            swept,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Stage boundary: stop the attempt if cancellation was requested.
    fn checkpoint(&self) -> BenchResult<()> {
        if self.is_cancelled() {
            return Err(BenchError::Interrupted);
        }
        Ok(())
    }

    fn remote_path(&self, run_index: usize, file: &InputFile) -> String {
        join_remote(
            &self.config.remote_root,
            &format!("{}r{}_{}", BENCHMARK_PREFIX, run_index, file.name),
        )
    }

    async fn sweep(&self) -> usize {
        match sweep_remote(self.store(), &self.config.remote_root).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "stale object sweep failed");
                0
            }
        }
    }

    #[instrument(skip(self, file), fields(file = %file.name))]
    async fn attempt(&self, run_index: usize, file: &InputFile, level: i32) -> BenchResult<TransferRecord> {
        let mut attempt = Attempt::new(run_index, level, self.remote_path(run_index, file))?;
        let result = self.round_trip(&mut attempt, file).await;
        match result {
            Ok(record) => {
                attempt.cleanup(self.store()).await;
                debug!(run = run_index, to = ?Stage::Recorded, "stage");
                Ok(record)
            }
            Err(e) => {
                let at = attempt.stage;
                attempt.advance(Stage::Failed);
                debug!(run = run_index, failed_after = ?at, "attempt failed, cleaning up");
                attempt.cleanup(self.store()).await;
                Err(e)
            }
        }
    }

    async fn round_trip(&self, attempt: &mut Attempt, file: &InputFile) -> BenchResult<TransferRecord> {
        let store = self.store();
        let codec = self.config.codec;
        let level = attempt.level;

        let original = FileFingerprint::of(&file.path, self.config.enable_verification)?;

        // Prepared -> Compressed
        let (artifact, transferred_size, compress_time) = if level == 0 {
            (file.path.clone(), original.size, Duration::ZERO)
        } else {
            let out = attempt.scratch_path(&format!("artifact{}", codec.suffix()));
            let start = Instant::now();
            let size = run_codec(file.path.clone(), out.clone(), move |i, o| codec.compress_file(&i, &o, level)).await?;
            (out, size, start.elapsed())
        };
        attempt.advance(Stage::Compressed);
        self.checkpoint()?;

        // Compressed -> Uploaded
        attempt.remote_written = true;
        let start = Instant::now();
        store.put(&artifact, &attempt.remote_path, true).await?;
        let upload_time = start.elapsed();
        verify_upload(store, &attempt.remote_path, transferred_size)
            .await
            .into_result("upload", transferred_size)?;
        attempt.advance(Stage::Uploaded);
        self.checkpoint()?;

        // Uploaded -> Transferred
        if self.config.enable_metadata {
            let algorithm = if level == 0 { CompressionAlgorithm::None } else { codec };
            let ratio = if level == 0 { 0.0 } else { compression_ratio(original.size, transferred_size) };
            if let Err(e) = self
                .attach_metadata(&attempt.remote_path, algorithm, original.size, ratio, level)
                .await
            {
                warn!(remote = %attempt.remote_path, error = %e, "continuing without metadata");
            }
        }
        attempt.advance(Stage::Transferred);
        self.checkpoint()?;

        // Transferred -> Downloaded
        let downloaded = attempt.scratch_path("download");
        let start = Instant::now();
        store.get(&attempt.remote_path, &downloaded, true).await?;
        let download_time = start.elapsed();
        verify_download(&downloaded, transferred_size).into_result("download", transferred_size)?;
        attempt.advance(Stage::Downloaded);
        self.checkpoint()?;

        // Downloaded -> Decompressed
        let (final_path, decompress_time) = if level == 0 {
            (downloaded, Duration::ZERO)
        } else {
            let algorithm = self.decompression_codec(&attempt.remote_path).await?;
            let out = attempt.scratch_path("restored");
            let start = Instant::now();
            run_codec(downloaded, out.clone(), move |i, o| algorithm.decompress_file(&i, &o)).await?;
            (out, start.elapsed())
        };
        attempt.advance(Stage::Decompressed);
        self.checkpoint()?;

        // Decompressed -> Verified
        original.verify(&final_path)?;
        attempt.advance(Stage::Verified);

        Ok(TransferRecord {
            run_index: attempt.run_index,
            filename: file.name.clone(),
            original_size: original.size,
            transferred_size,
            compression_level: level,
            compression_ratio: compression_ratio(original.size, transferred_size),
            compress_time,
            upload_time,
            download_time,
            decompress_time,
            throughput_up: throughput_mbps(transferred_size, upload_time),
            throughput_down: throughput_mbps(transferred_size, download_time),
        })
    }

    async fn attach_metadata(
        &self,
        remote_path: &str,
        algorithm: CompressionAlgorithm,
        original_size: u64,
        ratio: f64,
        level: i32,
    ) -> BenchResult<()> {
        let entries = [
            (META_ALGORITHM, algorithm.as_str().to_string()),
            (META_ORIGINAL_SIZE, original_size.to_string()),
            (META_RATIO, format!("{:.2}", ratio)),
            (META_LEVEL, level.to_string()),
        ];
        for (key, value) in &entries {
            self.store
                .add_metadata(remote_path, key, value)
                .await
                .map_err(|e| BenchError::MetadataWriteFailure(format!("{}: {}", key, e)))?;
        }
        debug!(remote_path, algorithm = algorithm.as_str(), level, "metadata attached");
        Ok(())
    }

    /// Codec named by the object's metadata, or the configured codec.
    async fn decompression_codec(&self, remote_path: &str) -> BenchResult<CompressionAlgorithm> {
        if !self.config.enable_metadata {
            return Ok(self.config.codec);
        }
        match self.store.read_metadata(remote_path).await {
            Ok(meta) => match meta.get(META_ALGORITHM) {
                Some(name) => CompressionAlgorithm::from_name(name)
                    .ok_or_else(|| BenchError::CodecFailure(format!("unknown compression algorithm: {}", name))),
                None => Ok(self.config.codec),
            },
            Err(e) => {
                warn!(remote_path, error = %e, "could not read metadata, using default codec");
                Ok(self.config.codec)
            }
        }
    }
}

/// Run a blocking file codec off the async runtime.
async fn run_codec<F>(input: PathBuf, output: PathBuf, f: F) -> BenchResult<u64>
where
    F: FnOnce(PathBuf, PathBuf) -> BenchResult<u64> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(input, output))
        .await
        .map_err(|e| BenchError::CodecFailure(format!("codec task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BoxFuture, FaultPlan, MemoryStore, Metadata, StoreResult};
    use std::sync::Arc;

    const ROOT: &str = "/zone/home/bench";

    fn write_files(dir: &Path, files: &[(&str, Vec<u8>)]) -> Vec<InputFile> {
        for (name, data) in files {
            std::fs::write(dir.join(name), data).unwrap();
        }
        collect_input_files(dir).unwrap()
    }

    fn text(len: usize) -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog\n"
            .iter()
            .cycle()
            .take(len)
            .copied()
            .collect()
    }

    fn config(runs: usize) -> BenchConfig {
        BenchConfig {
            test_runs: runs,
            remote_root: ROOT.to_string(),
            enable_adaptive_compression: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_collect_input_files_sorted_regular_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let files = write_files(dir.path(), &[("b.txt", vec![1; 3]), ("a.txt", vec![2; 5])]);
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(files[0].size, 5);
    }

    #[tokio::test]
    async fn test_fixed_level_round_trip_records_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("doc.txt", text(200_000))]);
        let store = Arc::new(MemoryStore::new());
        let cfg = BenchConfig {
            fixed_level: Some(6),
            ..config(2)
        };

        let outcome = Benchmark::new(cfg, Box::new(store.clone()))
            .unwrap()
            .run(&files)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.failed, 0);
        assert!(!outcome.aborted);
        let rec = &outcome.records[0];
        assert_eq!(rec.compression_level, 6);
        assert_eq!(rec.original_size, 200_000);
        assert!(rec.transferred_size < rec.original_size);
        assert!((0.0..100.0).contains(&rec.compression_ratio));
        assert_eq!(store.stored_count(), 0);
        assert!(store.is_closed());
        // four metadata keys per attempt
        assert_eq!(store.stats().metadata_writes, 8);
    }

    #[tokio::test]
    async fn test_level_zero_passes_file_through() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("raw.bin", text(10_000))]);
        let store = Arc::new(MemoryStore::new());
        let outcome = Benchmark::new(config(1), Box::new(store.clone()))
            .unwrap()
            .run(&files)
            .await
            .unwrap();
        let rec = &outcome.records[0];
        assert_eq!(rec.compression_level, 0);
        assert_eq!(rec.transferred_size, rec.original_size);
        assert_eq!(rec.compress_time, Duration::ZERO);
        assert_eq!(rec.decompress_time, Duration::ZERO);
        assert_eq!(rec.compression_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_failure_ratio_aborts_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs: Vec<(String, Vec<u8>)> = (0..6).map(|i| (format!("bad_{}", i), text(100))).collect();
        inputs.extend((0..4).map(|i| (format!("good_{}", i), text(100))));
        let refs: Vec<(&str, Vec<u8>)> = inputs.iter().map(|(n, d)| (n.as_str(), d.clone())).collect();
        let files = write_files(dir.path(), &refs);

        let store = Arc::new(MemoryStore::with_faults(FaultPlan {
            fail_puts_containing: Some("bad_".into()),
            ..Default::default()
        }));
        let outcome = Benchmark::new(config(1), Box::new(store.clone()))
            .unwrap()
            .run(&files)
            .await
            .unwrap();

        assert_eq!(outcome.planned, 10);
        assert!(outcome.aborted);
        assert_eq!(outcome.failed, 6);
        assert_eq!(outcome.attempted, 6);
        assert!(outcome.records.len() <= 4);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_failures_below_threshold_continue() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(
            dir.path(),
            &[("bad_a", text(100)), ("ok_b", text(100)), ("ok_c", text(100)), ("ok_d", text(100))],
        );
        let store = Arc::new(MemoryStore::with_faults(FaultPlan {
            fail_puts_containing: Some("bad_".into()),
            ..Default::default()
        }));
        let outcome = Benchmark::new(config(2), Box::new(store.clone()))
            .unwrap()
            .run(&files)
            .await
            .unwrap();
        assert!(!outcome.aborted);
        assert_eq!(outcome.attempted, 8);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.records.len(), 6);
        assert_eq!(outcome.aggregate().unwrap().files_tested, vec!["ok_b", "ok_c", "ok_d"]);
    }

    #[tokio::test]
    async fn test_truncated_upload_fails_and_cleans_remote() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("f.txt", text(5000))]);
        let store = Arc::new(MemoryStore::with_faults(FaultPlan {
            truncate_puts: true,
            ..Default::default()
        }));
        let cfg = BenchConfig {
            max_failure_ratio: 1.0,
            ..config(1)
        };
        let outcome = Benchmark::new(cfg, Box::new(store.clone())).unwrap().run(&files).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert!(outcome.records.is_empty());
        assert!(outcome.aggregate().is_none());
        assert_eq!(store.stored_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupted_download_is_never_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("f.txt", text(5000))]);
        let store = Arc::new(MemoryStore::with_faults(FaultPlan {
            corrupt_gets: true,
            ..Default::default()
        }));
        let cfg = BenchConfig {
            max_failure_ratio: 1.0,
            ..config(1)
        };
        let outcome = Benchmark::new(cfg, Box::new(store.clone())).unwrap().run(&files).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_download_fails_the_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("f.txt", text(50_000))]);
        let store = Arc::new(MemoryStore::with_faults(FaultPlan {
            corrupt_gets: true,
            ..Default::default()
        }));
        let cfg = BenchConfig {
            fixed_level: Some(3),
            max_failure_ratio: 1.0,
            ..config(1)
        };

        let bench = Benchmark::new(cfg.clone(), Box::new(store.clone())).unwrap();
        // flipped frame header cannot be decoded
        assert!(matches!(
            bench.attempt(1, &files[0], 3).await,
            Err(BenchError::CodecFailure(_))
        ));
        assert_eq!(store.stored_count(), 0);

        let outcome = Benchmark::new(cfg, Box::new(store.clone())).unwrap().run(&files).await.unwrap();
        assert_eq!(outcome.attempted, 1);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.records.is_empty());
        assert_eq!(store.stored_count(), 0);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_empty_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("empty.dat", vec![])]);
        let cfg = BenchConfig {
            fixed_level: Some(1),
            codec: CompressionAlgorithm::None,
            ..config(1)
        };
        let outcome = Benchmark::new(cfg, Box::new(MemoryStore::new())).unwrap().run(&files).await.unwrap();
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].transferred_size, 0);
        assert_eq!(outcome.records[0].compression_ratio, 0.0);
    }

    /// Requests cancellation when the `nth` upload starts.
    struct CancellingStore {
        inner: Arc<MemoryStore>,
        cancel: watch::Sender<bool>,
        nth: usize,
        puts: std::sync::atomic::AtomicUsize,
    }

    impl RemoteStore for CancellingStore {
        fn put<'a>(&'a self, local_path: &'a Path, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>> {
            let n = self.puts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if n == self.nth {
                let _ = self.cancel.send(true);
            }
            self.inner.put(local_path, remote_path, force)
        }
        fn get<'a>(&'a self, remote_path: &'a str, local_path: &'a Path, force: bool) -> BoxFuture<'a, StoreResult<()>> {
            self.inner.get(remote_path, local_path, force)
        }
        fn unlink<'a>(&'a self, remote_path: &'a str, force: bool) -> BoxFuture<'a, StoreResult<()>> {
            self.inner.unlink(remote_path, force)
        }
        fn stat_size<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<u64>> {
            self.inner.stat_size(remote_path)
        }
        fn add_metadata<'a>(&'a self, remote_path: &'a str, key: &'a str, value: &'a str) -> BoxFuture<'a, StoreResult<()>> {
            self.inner.add_metadata(remote_path, key, value)
        }
        fn read_metadata<'a>(&'a self, remote_path: &'a str) -> BoxFuture<'a, StoreResult<Metadata>> {
            self.inner.read_metadata(remote_path)
        }
        fn list<'a>(&'a self, remote_dir: &'a str) -> BoxFuture<'a, StoreResult<Vec<String>>> {
            self.inner.list(remote_dir)
        }
        fn close(&self) -> BoxFuture<'_, StoreResult<()>> {
            self.inner.close()
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_closes_session_with_partial_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("a.txt", text(1000)), ("b.txt", text(1000)), ("c.txt", text(1000))]);
        let memory = Arc::new(MemoryStore::new());
        let (tx, rx) = watch::channel(false);
        let store = CancellingStore {
            inner: memory.clone(),
            cancel: tx,
            nth: 2,
            puts: Default::default(),
        };

        let outcome = Benchmark::new(config(1), Box::new(store))
            .unwrap()
            .with_cancel(rx)
            .run(&files)
            .await
            .unwrap();

        assert!(outcome.interrupted);
        assert!(!outcome.aborted);
        assert_eq!(outcome.planned, 3);
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].filename, "a.txt");
        assert_eq!(memory.stored_count(), 0);
        assert!(memory.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("a.txt", text(1000))]);
        let store = Arc::new(MemoryStore::new());
        let (_tx, rx) = watch::channel(true);
        let cfg = BenchConfig {
            enable_adaptive_compression: true,
            ..config(2)
        };

        let outcome = Benchmark::new(cfg, Box::new(store.clone()))
            .unwrap()
            .with_cancel(rx)
            .run(&files)
            .await
            .unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.plan, CompressionPlan::uncompressed());
        assert_eq!(outcome.attempted, 0);
        assert!(outcome.records.is_empty());
        assert_eq!(store.stats().puts, 0);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_unused_cancel_channel_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("a.txt", text(1000))]);
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let outcome = Benchmark::new(config(2), Box::new(MemoryStore::new()))
            .unwrap()
            .with_cancel(rx)
            .run(&files)
            .await
            .unwrap();
        assert!(!outcome.interrupted);
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test]
    async fn test_metadata_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("f.txt", text(50_000))]);
        let store = Arc::new(MemoryStore::with_faults(FaultPlan {
            fail_metadata: true,
            ..Default::default()
        }));
        let cfg = BenchConfig {
            fixed_level: Some(3),
            ..config(1)
        };
        let outcome = Benchmark::new(cfg, Box::new(store.clone())).unwrap().run(&files).await.unwrap();
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_decompression_uses_codec_from_metadata() {
        let store = MemoryStore::new();
        store.insert("/r/obj", vec![]);
        store.add_metadata("/r/obj", META_ALGORITHM, "lz4").await.unwrap();
        store.insert("/r/bad", vec![]);
        store.add_metadata("/r/bad", META_ALGORITHM, "brotli").await.unwrap();
        let bench = Benchmark::new(config(1), Box::new(store)).unwrap();

        assert_eq!(bench.decompression_codec("/r/obj").await.unwrap(), CompressionAlgorithm::Lz4);
        assert!(matches!(
            bench.decompression_codec("/r/bad").await,
            Err(BenchError::CodecFailure(_))
        ));
        // unreadable metadata falls back to the configured codec
        assert_eq!(bench.decompression_codec("/r/missing").await.unwrap(), CompressionAlgorithm::Zstd);
    }

    #[tokio::test]
    async fn test_lz4_codec_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("f.txt", text(100_000))]);
        let cfg = BenchConfig {
            fixed_level: Some(1),
            codec: CompressionAlgorithm::Lz4,
            ..config(1)
        };
        let outcome = Benchmark::new(cfg, Box::new(MemoryStore::new())).unwrap().run(&files).await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].transferred_size < 100_000);
    }

    #[tokio::test]
    async fn test_adaptive_run_probes_once_and_selects_levels() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_files(dir.path(), &[("small.txt", text(20_000))]);
        let store = Arc::new(MemoryStore::new());
        let cfg = BenchConfig {
            enable_adaptive_compression: true,
            probe_size_mb: 0.1,
            probe_samples: 2,
            ..config(2)
        };
        let outcome = Benchmark::new(cfg, Box::new(store.clone())).unwrap().run(&files).await.unwrap();
        assert!(outcome.plan.adaptive);
        assert!(outcome.plan.estimate.is_some());
        assert!(outcome.plan.selection.is_some());
        // sub-MB files are always capped to level 1
        assert!(outcome.records.iter().all(|r| r.compression_level == 1));
        // 2 probe puts + 2 attempt puts
        assert_eq!(store.stats().puts, 4);
    }

    #[tokio::test]
    async fn test_probe_failure_disables_compression() {
        let store = Arc::new(MemoryStore::with_faults(FaultPlan {
            fail_puts_containing: Some(PROBE_PREFIX.into()),
            ..Default::default()
        }));
        let cfg = BenchConfig {
            enable_adaptive_compression: true,
            probe_size_mb: 0.1,
            ..config(1)
        };
        let bench = Benchmark::new(cfg, Box::new(store)).unwrap();
        let plan = bench.plan().await;
        assert_eq!(plan, CompressionPlan::uncompressed());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_benchmark_objects() {
        let store = MemoryStore::new();
        store.insert("/r/benchmark_r1_a.txt", vec![1]);
        store.insert("/r/.speedtest_abc.tmp", vec![1]);
        store.insert("/r/keep.txt", vec![1]);
        store.insert("/r/sub/benchmark_r1_b.txt", vec![1]);
        assert_eq!(sweep_remote(&store, "/r").await.unwrap(), 2);
        assert_eq!(store.paths(), vec!["/r/keep.txt", "/r/sub/benchmark_r1_b.txt"]);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let cfg = BenchConfig {
            test_runs: 0,
            ..Default::default()
        };
        assert!(matches!(
            Benchmark::new(cfg, Box::new(MemoryStore::new())),
            Err(BenchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_plan_level_for() {
        let selector = StrategySelector::default();
        assert_eq!(CompressionPlan::fixed(9).level_for(&selector, 500), 9);
        let plan = CompressionPlan {
            estimate: Some(NetworkEstimate {
                avg_upload_mbps: 5.0,
                avg_download_mbps: 5.0,
                avg_latency_ms: 10.0,
                samples: 1,
            }),
            selection: None,
            base_level: 9,
            adaptive: true,
        };
        assert_eq!(plan.level_for(&selector, 500 * 1024), 1);
        assert_eq!(plan.level_for(&selector, 200 * 1024 * 1024), 11);
    }
}
