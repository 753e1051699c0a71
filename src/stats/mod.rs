//! Statistics collection and reporting module
//!
//! This module provides functionality for tracking and reporting engine
//! statistics, including:
//! - Windowed per-lane hashrate (10s / 60s / 15m)
//! - Result counting
//! - Hardware monitoring (CPU, memory, temperature)
//!
//! Lanes write into [`Hashrate`]; [`StatsReporter`] periodically reads it
//! through the scheduler and logs a speed line.

/// Lock-free windowed hashrate storage
pub mod hashrate;

/// Submodule containing the statistics reporter implementation
///
/// The reporter handles:
/// - Atomic collection of result statistics
/// - Hardware monitoring
/// - Periodic reporting of stats
pub mod reporter;

// Re-export main components
pub use hashrate::Hashrate;
pub use reporter::{HardwareStats, MiningStats, StatsReporter};
