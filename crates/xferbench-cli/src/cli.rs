use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use xferbench_core::{
    collect_input_files, probe, BenchConfig, Benchmark, BenchmarkOutcome, CompressionAlgorithm,
    CompressionPlan, DirStore, InputFile, MemoryStore, RemoteStore, ResourceSampler, ResourceStats,
    StrategySelector, StrategyTable,
};

use crate::report;

#[derive(Parser)]
#[command(name = "xferbench")]
#[command(about = "Adaptive compression benchmark for remote object transfers", long_about = None)]
pub struct Cli {
    /// TOML or JSON configuration file
    #[arg(short, long, env = "XFERBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory standing in for the remote store (e.g. a mounted share); in-memory when absent
    #[arg(long, env = "XFERBENCH_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Probe, select levels and benchmark every input file
    Run {
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Benchmark once uncompressed and once adaptively, then compare
    Compare {
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Measure network speed and show the tier it selects
    Probe {
        /// Number of upload/download samples
        #[arg(long)]
        samples: Option<usize>,
        /// Size of each sample file, MB
        #[arg(long)]
        size_mb: Option<f64>,
        /// Remote directory for the sample objects
        #[arg(long)]
        remote_root: Option<String>,
        /// Print the estimate as JSON
        #[arg(long)]
        json: bool,
    },
    /// Predict per-level benefit for a file without transferring anything
    Estimate {
        /// Average network speed, MB/s
        #[arg(long)]
        speed: f64,
        /// File size, MB
        #[arg(long)]
        size_mb: f64,
        /// Expected size reduction, percent
        #[arg(long, default_value = "60")]
        ratio: f64,
        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Clone, Default)]
pub struct RunOpts {
    /// Passes over the input files
    #[arg(long)]
    pub runs: Option<usize>,
    /// Directory of input files
    #[arg(long)]
    pub files_dir: Option<PathBuf>,
    /// Remote directory for benchmark objects
    #[arg(long)]
    pub remote_root: Option<String>,
    /// Fixed level; disables adaptive selection (0 = no compression)
    #[arg(long)]
    pub level: Option<i32>,
    /// Codec: none, lz4 or zstd
    #[arg(long)]
    pub codec: Option<CompressionAlgorithm>,
    /// Stop once failed / planned attempts exceeds this
    #[arg(long)]
    pub max_failure_ratio: Option<f64>,
    /// Size of each network sample file, MB
    #[arg(long)]
    pub probe_size_mb: Option<f64>,
    /// Number of network samples
    #[arg(long)]
    pub probe_samples: Option<usize>,
    /// Skip SHA-256 comparison of restored files
    #[arg(long)]
    pub no_verify: bool,
    /// Do not attach compression metadata to uploads
    #[arg(long)]
    pub no_metadata: bool,
    /// Keep stale benchmark objects in the remote root
    #[arg(long)]
    pub no_cleanup: bool,
    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunOpts {
    pub fn apply(&self, config: &mut BenchConfig) {
        if let Some(runs) = self.runs {
            config.test_runs = runs;
        }
        if let Some(dir) = &self.files_dir {
            config.test_files_dir = dir.clone();
        }
        if let Some(root) = &self.remote_root {
            config.remote_root = root.clone();
        }
        if let Some(level) = self.level {
            config.fixed_level = Some(level);
            config.enable_adaptive_compression = false;
        }
        if let Some(codec) = self.codec {
            config.codec = codec;
        }
        if let Some(ratio) = self.max_failure_ratio {
            config.max_failure_ratio = ratio;
        }
        if let Some(size) = self.probe_size_mb {
            config.probe_size_mb = size;
        }
        if let Some(samples) = self.probe_samples {
            config.probe_samples = samples;
        }
        if self.no_verify {
            config.enable_verification = false;
        }
        if self.no_metadata {
            config.enable_metadata = false;
        }
        if self.no_cleanup {
            config.enable_cleanup = false;
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match &self.command {
            Command::Run { opts } => self.benchmark(opts).await,
            Command::Compare { opts } => self.compare(opts).await,
            Command::Probe {
                samples,
                size_mb,
                remote_root,
                json,
            } => self.probe(*samples, *size_mb, remote_root.clone(), *json).await,
            Command::Estimate {
                speed,
                size_mb,
                ratio,
                json,
            } => self.estimate(*speed, *size_mb, *ratio, *json),
        }
    }

    fn load_config(&self) -> Result<BenchConfig> {
        match &self.config {
            Some(path) => BenchConfig::from_file(path).with_context(|| format!("loading {}", path.display())),
            None => Ok(BenchConfig::default()),
        }
    }

    fn open_store(&self) -> Result<Box<dyn RemoteStore>> {
        match &self.store_dir {
            Some(dir) => Ok(Box::new(
                DirStore::open(dir).with_context(|| format!("opening store at {}", dir.display()))?,
            )),
            None => {
                warn!("no --store-dir given, transfers go to an in-memory store");
                Ok(Box::new(MemoryStore::new()))
            }
        }
    }

    fn inputs(config: &BenchConfig) -> Result<Vec<InputFile>> {
        let files = collect_input_files(&config.test_files_dir)
            .with_context(|| format!("reading {}", config.test_files_dir.display()))?;
        if files.is_empty() {
            anyhow::bail!("no input files in {}", config.test_files_dir.display());
        }
        info!(files = files.len(), dir = %config.test_files_dir.display(), "input files");
        Ok(files)
    }

    /// Run one benchmark with the resource sampler attached.
    ///
    /// Ctrl-C stops the benchmark between steps; the outcome is then partial and flagged interrupted.
    async fn execute(
        &self,
        config: &BenchConfig,
        files: &[InputFile],
        plan: Option<CompressionPlan>,
    ) -> Result<(BenchmarkOutcome, ResourceStats)> {
        let (cancel, listener) = cancel_on(tokio::signal::ctrl_c());
        let bench = Benchmark::new(config.clone(), self.open_store()?)?.with_cancel(cancel);
        let sampler = ResourceSampler::start(Duration::from_millis(config.sampler_interval_ms));

        let result = match plan {
            Some(plan) => bench.run_with_plan(files, plan).await,
            None => bench.run(files).await,
        };
        listener.abort();
        let resources = sampler.stop().await;
        let outcome = result?;
        if outcome.interrupted {
            warn!(
                attempted = outcome.attempted,
                planned = outcome.planned,
                "interrupted, remote artifacts removed and session closed"
            );
        }
        Ok((outcome, resources))
    }

    async fn benchmark(&self, opts: &RunOpts) -> Result<()> {
        let mut config = self.load_config()?;
        opts.apply(&mut config);
        let files = Self::inputs(&config)?;

        let (outcome, resources) = self.execute(&config, &files, None).await?;
        let stats = outcome.aggregate();

        if opts.json {
            println!("{}", serde_json::to_string_pretty(&report::summary_json(&outcome, stats.as_ref(), &resources))?);
        } else {
            print!("{}", report::render_summary(&outcome, stats.as_ref(), &resources));
        }
        if outcome.interrupted {
            anyhow::bail!("interrupted");
        }
        if stats.is_none() {
            anyhow::bail!("no successful runs");
        }
        Ok(())
    }

    async fn compare(&self, opts: &RunOpts) -> Result<()> {
        let mut config = self.load_config()?;
        opts.apply(&mut config);
        let files = Self::inputs(&config)?;

        info!("baseline pass without compression");
        let (baseline, _) = self
            .execute(&config, &files, Some(CompressionPlan::uncompressed()))
            .await?;
        if baseline.interrupted {
            anyhow::bail!("interrupted during baseline pass");
        }
        info!("adaptive pass");
        let (adaptive, resources) = self.execute(&config, &files, None).await?;
        if adaptive.interrupted {
            anyhow::bail!("interrupted during adaptive pass");
        }

        let (Some(base_stats), Some(adapt_stats)) = (baseline.aggregate(), adaptive.aggregate()) else {
            anyhow::bail!("comparison needs at least one successful run in each pass");
        };

        if opts.json {
            let value = report::comparison_json(&baseline, &base_stats, &adaptive, &adapt_stats, &resources);
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            print!("{}", report::render_comparison(&base_stats, &adapt_stats));
        }
        Ok(())
    }

    async fn probe(&self, samples: Option<usize>, size_mb: Option<f64>, remote_root: Option<String>, json: bool) -> Result<()> {
        let mut config = self.load_config()?;
        if let Some(n) = samples {
            config.probe_samples = n;
        }
        if let Some(size) = size_mb {
            config.probe_size_mb = size;
        }
        if let Some(root) = remote_root {
            config.remote_root = root;
        }
        let table = config.validate()?;
        let selector = StrategySelector::new(table, Default::default());

        let store = self.open_store()?;
        let result = probe(store.as_ref(), &config.remote_root, config.probe_size_mb, config.probe_samples).await;
        if let Err(e) = store.close().await {
            warn!(error = %e, "store session did not close cleanly");
        }
        let estimate = result?;
        let selection = selector.select_tier(estimate.avg_speed_mbps());

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "estimate": estimate,
                    "selection": selection,
                }))?
            );
        } else {
            print!("{}", report::render_probe(&estimate, &selection));
        }
        Ok(())
    }

    fn estimate(&self, speed: f64, size_mb: f64, ratio: f64, json: bool) -> Result<()> {
        let config = self.load_config()?;
        let table = StrategyTable::new(config.tiers.clone())?;
        let selector = StrategySelector::new(table, Default::default());
        let selection = selector.select_tier(speed);
        let benefits = selector.estimate_benefit(speed, size_mb, ratio);

        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "selection": selection,
                    "benefits": benefits,
                }))?
            );
        } else {
            print!("{}", report::render_estimate(&selection, size_mb, &benefits));
        }
        Ok(())
    }
}

/// Flip the returned flag to `true` once `signal` fires.
///
/// A signal that fails to install is logged and never cancels.
fn cancel_on<F>(signal: F) -> (watch::Receiver<bool>, JoinHandle<()>)
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    let listener = tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                warn!("interrupt received, stopping after cleanup");
                let _ = tx.send(true);
            }
            Err(e) => warn!(error = %e, "could not listen for interrupts"),
        }
    });
    (rx, listener)
}
