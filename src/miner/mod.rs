// src/miner/mod.rs
//! Core engine functionality
//!
//! This module contains everything between an incoming job and a hashing
//! lane:
//! - Jobs, targets and results
//! - Per-kind generation counters and the global pause flag
//! - Nonce partitioning per lane-group
//! - The shared worker state machine
//! - Hash algorithm capability
//! - Job dispatch across backends

/// Mining algorithm implementations
///
/// Contains the [`Algorithm`] trait, the registry and the CryptoNight binding.
pub mod algorithm;

/// Jobs, targets and results
pub mod job;

/// Generation counters shared by every lane
pub mod nonce;

/// Job dispatch across backends
///
/// Validates incoming jobs, fans them out and aggregates hashrate.
pub mod scheduler;

/// Worker thread implementation
///
/// The state machine every CPU and GPU lane runs.
pub mod worker;

/// Per lane-group nonce cursor
pub mod worker_job;

// Re-export main components for cleaner imports
pub use self::algorithm::{Algorithm, AlgorithmRegistry};
pub use self::job::{Job, JobNotification, JobResult};
pub use self::nonce::NonceCoordinator;
pub use self::scheduler::Scheduler;
pub use self::worker::{Worker, WorkerState};
pub use self::worker_job::WorkerJob;
