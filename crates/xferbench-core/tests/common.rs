//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use rand::RngCore;
use tempfile::TempDir;
use xferbench_core::{BenchConfig, FaultPlan, MemoryStore};

pub const REMOTE_ROOT: &str = "/tempZone/home/rods";
pub const MB: usize = 1024 * 1024;

/// Scratch input directory plus the files written into it.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Highly compressible text of `len` bytes.
    pub fn compressible(&self, name: &str, len: usize) -> &Self {
        let line = b"timestamp=2024-01-01T00:00:00Z level=INFO msg=\"transfer complete\" bytes=4096\n";
        let mut file = std::fs::File::create(self.dir.path().join(name)).unwrap();
        let mut written = 0;
        while written < len {
            let n = line.len().min(len - written);
            file.write_all(&line[..n]).unwrap();
            written += n;
        }
        self
    }

    /// Random, incompressible bytes.
    pub fn random(&self, name: &str, len: usize) -> &Self {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        std::fs::write(self.dir.path().join(name), data).unwrap();
        self
    }
}

/// Config for fast, non-probing runs.
pub fn fixed_config(runs: usize, level: Option<i32>) -> BenchConfig {
    BenchConfig {
        test_runs: runs,
        remote_root: REMOTE_ROOT.to_string(),
        enable_adaptive_compression: false,
        fixed_level: level,
        ..Default::default()
    }
}

/// Config for adaptive runs with a small probe.
pub fn adaptive_config(runs: usize) -> BenchConfig {
    BenchConfig {
        test_runs: runs,
        remote_root: REMOTE_ROOT.to_string(),
        probe_size_mb: 0.25,
        probe_samples: 2,
        ..Default::default()
    }
}

/// In-memory store shared between the benchmark and the test.
pub fn shared_store(faults: FaultPlan) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_faults(faults))
}
