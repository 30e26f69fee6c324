#![warn(missing_docs)]

//! xferbench core: adaptive compression for remote object transfers
//!
//! Pipeline: Probe network → Select tier → per (run, file): Compress → Upload → Metadata → Download → Decompress → Verify → Record → Aggregate

pub mod aggregate;
pub mod codec;
pub mod config;
pub mod dir_store;
pub mod error;
pub mod executor;
pub mod probe;
pub mod record;
pub mod sampler;
pub mod store;
pub mod strategy;
pub mod verify;

pub use aggregate::{aggregate, AggregateStats, Comparison, FileStats};
pub use codec::CompressionAlgorithm;
pub use config::BenchConfig;
pub use dir_store::DirStore;
pub use error::{BenchError, BenchResult, StoreError};
pub use executor::{collect_input_files, sweep_remote, Benchmark, BenchmarkOutcome, CompressionPlan, InputFile, Stage};
pub use probe::{probe, NetworkEstimate, SpeedSample};
pub use record::TransferRecord;
pub use sampler::{ResourceSampler, ResourceStats, SamplerHandle};
pub use store::{FaultPlan, MemoryStore, Metadata, RemoteStore};
pub use strategy::{CompressionTier, LevelBenefit, LevelThroughput, StrategySelector, StrategyTable, TierSelection};
pub use verify::{verify_round_trip, FileFingerprint};
