// src/utils/error.rs
use crate::miner::job::JobResult;
use serde_json;
use std::io;
use thiserror::Error;

/// Main error type for the mining engine
///
/// Every fallible operation in the crate reports through this enum. None of
/// these values cross a worker thread boundary: the thread that hits a
/// condition logs it and ends its own lane.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Errors related to hash algorithms (unknown variant, missing implementation)
    #[error("Algorithm error: {0}")]
    AlgorithmError(String),

    /// Malformed job data (blob length, target, identifiers)
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Device backend library failures (load, context allocation, kernel launch)
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Scratchpad memory could not be allocated
    #[error("Allocation error: {0}")]
    AllocationError(String),

    /// Hash implementation produced a digest different from its reference
    #[error("Self-test failed: {0}")]
    SelfTestFailed(String),

    /// Topology description errors
    #[error("Topology error: {0}")]
    TopologyError(String),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Async task execution errors
    #[error("Task execution error: {0}")]
    TaskError(String),
}

/// Converts crossbeam channel send errors for results into MinerError
///
/// Only happens when the result consumer has gone away.
impl From<crossbeam_channel::SendError<JobResult>> for MinerError {
    fn from(e: crossbeam_channel::SendError<JobResult>) -> Self {
        MinerError::ChannelError(format!("Result send failed: {}", e))
    }
}

/// Converts hex decoding errors into MinerError
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

/// Converts TOML parse errors into MinerError
impl From<toml::de::Error> for MinerError {
    fn from(e: toml::de::Error) -> Self {
        MinerError::ConfigError(format!("Invalid config format: {}", e))
    }
}

/// Converts async task join errors into MinerError
impl From<tokio::task::JoinError> for MinerError {
    fn from(e: tokio::task::JoinError) -> Self {
        MinerError::TaskError(format!("Async task failed: {}", e))
    }
}
