// src/backend/cuda.rs
//! NVIDIA CUDA backend
//!
//! A [`GpuBackend`] over a CUDA device library. Batches default to 32768
//! nonces per launch.

use crate::backend::device::{DeviceBackend, DeviceLibrary};
use crate::backend::gpu::GpuBackend;
use crate::config::GpuConfig;
use crate::miner::job::JobResult;
use crate::miner::nonce::NonceCoordinator;
use crate::types::BackendKind;
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Nonces per batch when a device has no configured intensity
pub const DEFAULT_INTENSITY: u32 = 32768;

/// Builds the CUDA backend
///
/// # Arguments
/// * `config` - The `[cuda]` section
/// * `library` - CUDA device library, if one was found
/// * `coordinator` - Process-wide generation counters
/// * `results` - Result channel
pub fn backend(
    config: GpuConfig,
    library: Option<Arc<dyn DeviceLibrary>>,
    coordinator: Arc<NonceCoordinator>,
    results: Sender<JobResult>,
) -> GpuBackend {
    let device = DeviceBackend::resolve(BackendKind::Cuda, library, config.loader.as_deref());
    GpuBackend::new(BackendKind::Cuda, config, device, DEFAULT_INTENSITY, coordinator, results)
}
