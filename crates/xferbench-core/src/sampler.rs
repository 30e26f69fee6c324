//! Background CPU/memory sampler for the benchmark process.
//!
//! A tokio task polls the process on a fixed interval and owns the accumulated
//! samples. [`SamplerHandle::stop`] signals the task and joins it, so no sample
//! can be recorded after `stop` returns.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::strategy::MIB;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Source of (cpu percent, resident memory MB) readings.
pub trait ProcessProbe: Send + 'static {
    /// Take one reading, `None` if the process can no longer be inspected.
    fn read(&mut self) -> Option<(f32, f64)>;
}

/// [`ProcessProbe`] for the current process via `sysinfo`.
pub struct SysinfoProbe {
    sys: System,
    pid: Pid,
}

impl SysinfoProbe {
    /// Probe the current process.
    pub fn current() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut sys = System::new();
        // first cpu reading is always 0; prime it
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        Self { sys, pid }
    }
}

impl ProcessProbe for SysinfoProbe {
    fn read(&mut self) -> Option<(f32, f64)> {
        self.sys
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        self.sys
            .process(self.pid)
            .map(|p| (p.cpu_usage(), p.memory() as f64 / MIB))
    }
}

/// Summary of resource usage over the sampled window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// Wall time between start and stop, seconds.
    pub duration_secs: f64,
    /// Number of samples collected.
    pub sample_count: usize,
    /// Mean CPU percent.
    pub avg_cpu_percent: f64,
    /// Highest CPU percent seen.
    pub max_cpu_percent: f64,
    /// Mean resident memory, MB.
    pub avg_memory_mb: f64,
    /// Resident memory at start, MB.
    pub start_memory_mb: f64,
    /// Highest resident memory seen, MB.
    pub peak_memory_mb: f64,
    /// Resident memory at stop, MB.
    pub final_memory_mb: f64,
    /// `final - start`, MB.
    pub memory_delta_mb: f64,
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    cpu_sum: f64,
    cpu_max: f64,
    mem_sum: f64,
    samples: usize,
    start_memory_mb: f64,
    peak_memory_mb: f64,
}

impl Accumulator {
    fn record(&mut self, cpu: f32, mem_mb: f64) {
        let cpu = f64::from(cpu);
        self.cpu_sum += cpu;
        self.cpu_max = self.cpu_max.max(cpu);
        self.mem_sum += mem_mb;
        self.peak_memory_mb = self.peak_memory_mb.max(mem_mb);
        self.samples += 1;
    }

    fn stats(&self, duration: Duration, final_memory_mb: f64) -> ResourceStats {
        let n = self.samples.max(1) as f64;
        let has = self.samples > 0;
        ResourceStats {
            duration_secs: duration.as_secs_f64(),
            sample_count: self.samples,
            avg_cpu_percent: if has { self.cpu_sum / n } else { 0.0 },
            max_cpu_percent: self.cpu_max,
            avg_memory_mb: if has { self.mem_sum / n } else { 0.0 },
            start_memory_mb: self.start_memory_mb,
            peak_memory_mb: self.peak_memory_mb.max(final_memory_mb),
            final_memory_mb,
            memory_delta_mb: final_memory_mb - self.start_memory_mb,
        }
    }
}

/// Starts the background sampling task.
pub struct ResourceSampler;

impl ResourceSampler {
    /// Sample the current process every `interval`.
    pub fn start(interval: Duration) -> SamplerHandle {
        Self::start_with(Box::new(SysinfoProbe::current()), interval)
    }

    /// Sample with a custom probe. Intervals below 1 ms are raised to 1 ms.
    pub fn start_with(mut probe: Box<dyn ProcessProbe>, interval: Duration) -> SamplerHandle {
        let interval = interval.max(MIN_INTERVAL);
        let start_memory_mb = probe.read().map(|(_, m)| m).unwrap_or(0.0);
        let acc = Accumulator {
            start_memory_mb,
            peak_memory_mb: start_memory_mb,
            ..Default::default()
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let (snap_tx, snap_rx) = watch::channel(ResourceStats::default());
        let started = Instant::now();

        let join = tokio::spawn(run(probe, acc, interval, started, stop_rx, snap_tx));
        info!(baseline_memory_mb = format_args!("{:.2}", start_memory_mb), "resource sampler started");

        SamplerHandle {
            stop_tx,
            join,
            snapshot: snap_rx,
            started,
        }
    }
}

async fn run(
    mut probe: Box<dyn ProcessProbe>,
    mut acc: Accumulator,
    interval: Duration,
    started: Instant,
    mut stop_rx: oneshot::Receiver<()>,
    snap_tx: watch::Sender<ResourceStats>,
) -> (Box<dyn ProcessProbe>, Accumulator) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                match probe.read() {
                    Some((cpu, mem)) => {
                        acc.record(cpu, mem);
                        let _ = snap_tx.send(acc.stats(started.elapsed(), mem));
                    }
                    None => {
                        warn!("process no longer observable, sampler exiting");
                        break;
                    }
                }
            }
        }
    }
    debug!(samples = acc.samples, "sampler loop finished");
    (probe, acc)
}

/// Handle to a running sampler.
pub struct SamplerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<(Box<dyn ProcessProbe>, Accumulator)>,
    snapshot: watch::Receiver<ResourceStats>,
    started: Instant,
}

impl SamplerHandle {
    /// Stats so far, without stopping.
    pub fn snapshot(&self) -> ResourceStats {
        self.snapshot.borrow().clone()
    }

    /// True while the sampling task has not exited.
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stop sampling, wait for the task to exit and summarise.
    pub async fn stop(self) -> ResourceStats {
        let duration = self.started.elapsed();
        // the task may already have exited on its own
        let _ = self.stop_tx.send(());
        match self.join.await {
            Ok((mut probe, acc)) => {
                let final_memory_mb = probe.read().map(|(_, m)| m).unwrap_or(acc.start_memory_mb);
                let stats = acc.stats(duration, final_memory_mb);
                info!(samples = stats.sample_count, "resource sampler stopped");
                stats
            }
            Err(e) => {
                warn!(error = %e, "resource sampler task failed");
                ResourceStats {
                    duration_secs: duration.as_secs_f64(),
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedProbe {
        readings: Vec<(f32, f64)>,
        calls: Arc<AtomicUsize>,
    }

    impl ProcessProbe for ScriptedProbe {
        fn read(&mut self) -> Option<(f32, f64)> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Some(self.readings[i.min(self.readings.len() - 1)])
        }
    }

    #[test]
    fn test_accumulator_stats() {
        let mut acc = Accumulator {
            start_memory_mb: 100.0,
            peak_memory_mb: 100.0,
            ..Default::default()
        };
        acc.record(10.0, 110.0);
        acc.record(30.0, 130.0);
        let stats = acc.stats(Duration::from_secs(2), 120.0);
        assert_eq!(stats.sample_count, 2);
        assert_eq!(stats.avg_cpu_percent, 20.0);
        assert_eq!(stats.max_cpu_percent, 30.0);
        assert_eq!(stats.avg_memory_mb, 120.0);
        assert_eq!(stats.peak_memory_mb, 130.0);
        assert_eq!(stats.memory_delta_mb, 20.0);
        assert_eq!(stats.duration_secs, 2.0);
    }

    #[test]
    fn test_empty_accumulator() {
        let acc = Accumulator::default();
        let stats = acc.stats(Duration::ZERO, 0.0);
        assert_eq!(stats.sample_count, 0);
        assert_eq!(stats.avg_cpu_percent, 0.0);
    }

    #[tokio::test]
    async fn test_no_samples_after_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = ScriptedProbe {
            readings: vec![(5.0, 50.0), (15.0, 60.0), (25.0, 70.0)],
            calls: calls.clone(),
        };
        let handle = ResourceSampler::start_with(Box::new(probe), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(handle.is_running());

        let stats = handle.stop().await;
        assert!(stats.sample_count >= 1);
        assert_eq!(stats.start_memory_mb, 50.0);

        // start reading + samples + final reading, and nothing more afterwards
        let after_stop = calls.load(Ordering::SeqCst);
        assert_eq!(after_stop, stats.sample_count + 2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_snapshot_updates() {
        let probe = ScriptedProbe {
            readings: vec![(1.0, 10.0), (2.0, 20.0)],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let handle = ResourceSampler::start_with(Box::new(probe), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.snapshot().sample_count >= 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_zero_interval_is_raised() {
        let probe = ScriptedProbe {
            readings: vec![(1.0, 10.0)],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let handle = ResourceSampler::start_with(Box::new(probe), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_running());
        let stats = handle.stop().await;
        assert!(stats.sample_count >= 1);
    }

    #[tokio::test]
    async fn test_sysinfo_sampler_runs() {
        let handle = ResourceSampler::start(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = handle.stop().await;
        assert!(stats.start_memory_mb > 0.0);
        assert!(stats.duration_secs > 0.0);
    }
}
