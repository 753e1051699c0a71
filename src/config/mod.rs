// src/config/mod.rs
//! Configuration management for the nonce engine
//!
//! This module handles all configuration-related functionality including:
//! - Loading, parsing and validating configuration files
//! - Generating configuration templates
//!
//! The configuration uses TOML format with one section per backend kind.

/// Core configuration implementation
///
/// Contains the [`Config`] struct and the per-backend sections.
pub mod config;

// Re-export key items for easy access
pub use config::{Config, CpuConfig, GpuConfig, GpuThreadConfig};

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads engine configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
///
/// # Returns
/// * `Ok(Config)` - Successfully loaded configuration
/// * `Err(MinerError)` - If the file couldn't be read, parsed or validated
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
///
/// # Arguments
/// * `cuda` - Whether to enable the CUDA section with an example device
/// * `opencl` - Whether to enable the OpenCL section with an example device
///
/// # Returns
/// String containing a ready-to-use TOML configuration template
pub fn generate_template(cuda: bool, opencl: bool) -> String {
    Config::generate_template(cuda, opencl)
}
