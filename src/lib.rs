//! Nonce engine - multi-backend proof-of-work compute engine in Rust
//!
//! This crate turns jobs (a blob, a target and an algorithm) into a stream of
//! results across heterogeneous compute backends:
//! - CPU lanes with per-lane scratchpads, planned from the cache topology
//! - CUDA and OpenCL devices through a vendor device library
//! - Disjoint nonce ranges per lane and instant job switching
//! - Windowed hashrate reporting and benchmarking

#![warn(missing_docs)]
#![deny(unsafe_code)]

/// Compute backends (CPU, CUDA, OpenCL) and their thread pool
pub mod backend;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Engine core: jobs, nonce partitioning, workers, algorithms and scheduling
pub mod miner;

/// Statistics collection and reporting functionality
pub mod stats;

/// CPU cache topology and lane planning
pub mod topology;

/// Shared type definitions
pub mod types;

/// Utility functions and error handling
pub mod utils;

// Core exports
pub use backend::Backend;
pub use cli::Commands;
pub use config::Config;
pub use miner::{Algorithm, AlgorithmRegistry, Job, JobNotification, JobResult, NonceCoordinator, Scheduler, Worker};
pub use stats::{HardwareStats, Hashrate, MiningStats, StatsReporter};
pub use types::{AlgorithmType, BackendKind};
pub use utils::{MinerError, init_logging};
