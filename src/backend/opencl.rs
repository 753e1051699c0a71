// src/backend/opencl.rs
//! OpenCL backend
//!
//! A [`GpuBackend`] over an OpenCL device library. Batches default to 4096
//! nonces per kernel run.

use crate::backend::device::{DeviceBackend, DeviceLibrary};
use crate::backend::gpu::GpuBackend;
use crate::config::GpuConfig;
use crate::miner::job::JobResult;
use crate::miner::nonce::NonceCoordinator;
use crate::types::BackendKind;
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Nonces per batch when a device has no configured intensity
pub const DEFAULT_INTENSITY: u32 = 4096;

/// Builds the OpenCL backend
pub fn backend(
    config: GpuConfig,
    library: Option<Arc<dyn DeviceLibrary>>,
    coordinator: Arc<NonceCoordinator>,
    results: Sender<JobResult>,
) -> GpuBackend {
    let device = DeviceBackend::resolve(BackendKind::OpenCl, library, config.loader.as_deref());
    GpuBackend::new(BackendKind::OpenCl, config, device, DEFAULT_INTENSITY, coordinator, results)
}
