// src/backend/device.rs
//! Vendor device library capability
//!
//! Accelerator backends never talk to a driver directly. A vendor plugin
//! implements [`DeviceLibrary`]; it is resolved once at startup into a
//! [`DeviceBackend`], which is either live or unavailable with a reason.
//! Unavailable backends report themselves disabled and never start lanes.

use crate::types::{AlgorithmType, BackendKind};
use crate::utils::error::MinerError;
use std::path::Path;
use std::sync::Arc;

/// Capability interface version this build understands
pub const DEVICE_API_VERSION: u32 = 1;

/// Per-device kernel tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTuning {
    /// Nonces per batch
    pub intensity: u32,
    /// Work-group / block size
    pub worksize: u32,
}

/// Nonce whose digest the device pre-filtered as a possible result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Nonce that produced the digest
    pub nonce: u32,
    /// Full digest, checked against the target again on the host
    pub digest: [u8; 32],
}

/// Device-side state for one worker; released on drop
pub trait DeviceContext: Send {
    /// Hashes `batch_size` consecutive nonces starting at `nonce_start`
    ///
    /// `blob` is the job blob with the starting nonce already written in.
    /// The device may return only the candidates it considers below target.
    fn run_batch(&mut self, blob: &[u8], nonce_start: u32, batch_size: u32) -> Result<Vec<Candidate>, MinerError>;
}

/// Vendor plugin entry points
pub trait DeviceLibrary: Send + Sync {
    /// Interface version the plugin was built against
    fn api_version(&self) -> u32 {
        DEVICE_API_VERSION
    }

    /// Library name and version for status output
    fn name(&self) -> String;

    /// Devices the library can drive
    fn device_count(&self) -> usize;

    /// Allocates kernels and buffers on `device` for `algorithm`
    fn allocate_context(
        &self,
        device: usize,
        algorithm: AlgorithmType,
        tuning: &DeviceTuning,
    ) -> Result<Box<dyn DeviceContext>, MinerError>;
}

/// Outcome of resolving a vendor library
#[derive(Clone)]
pub enum DeviceBackend {
    /// Library loaded and compatible
    Live(Arc<dyn DeviceLibrary>),
    /// No usable library; the backend stays disabled
    Unavailable {
        /// Why the library could not be used
        reason: String,
    },
}

impl DeviceBackend {
    /// Checks `library` and wraps it
    ///
    /// # Arguments
    /// * `kind` - Backend the library is for, used in messages
    /// * `library` - Plugin found for this kind, if any
    /// * `loader` - Configured plugin path, reported when nothing was found
    pub fn resolve(kind: BackendKind, library: Option<Arc<dyn DeviceLibrary>>, loader: Option<&Path>) -> Self {
        let Some(library) = library else {
            let reason = match loader {
                Some(path) => format!("{} device library {} could not be loaded", kind, path.display()),
                None => format!("no {} device library available", kind),
            };
            return DeviceBackend::Unavailable { reason };
        };

        if library.api_version() != DEVICE_API_VERSION {
            return DeviceBackend::Unavailable {
                reason: format!(
                    "{} reports API version {}, expected {}",
                    library.name(),
                    library.api_version(),
                    DEVICE_API_VERSION
                ),
            };
        }

        if library.device_count() == 0 {
            return DeviceBackend::Unavailable {
                reason: format!("{} found no devices", library.name()),
            };
        }

        DeviceBackend::Live(library)
    }

    /// Library if live
    pub fn library(&self) -> Option<&Arc<dyn DeviceLibrary>> {
        match self {
            DeviceBackend::Live(library) => Some(library),
            DeviceBackend::Unavailable { .. } => None,
        }
    }

    /// Whether the library can be used
    pub fn is_live(&self) -> bool {
        matches!(self, DeviceBackend::Live(_))
    }

    /// Library name, or the reason it is unavailable
    pub fn describe(&self) -> String {
        match self {
            DeviceBackend::Live(library) => library.name(),
            DeviceBackend::Unavailable { reason } => reason.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory device library for backend tests

    use super::*;
    use crate::miner::job::{MIN_BLOB_SIZE, read_nonce};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Device that "hashes" by placing the nonce in the digest's top 32 bits
    pub struct FakeLibrary {
        pub devices: usize,
        pub broken_device: Option<usize>,
        pub version: u32,
        pub batches: Arc<AtomicUsize>,
    }

    impl FakeLibrary {
        pub fn new(devices: usize) -> Self {
            FakeLibrary {
                devices,
                broken_device: None,
                version: DEVICE_API_VERSION,
                batches: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct FakeContext {
        batches: Arc<AtomicUsize>,
    }

    impl DeviceContext for FakeContext {
        fn run_batch(&mut self, blob: &[u8], nonce_start: u32, batch_size: u32) -> Result<Vec<Candidate>, MinerError> {
            if blob.len() < MIN_BLOB_SIZE || read_nonce(blob) != nonce_start {
                return Err(MinerError::DeviceError("blob does not carry the start nonce".into()));
            }
            self.batches.fetch_add(1, Ordering::Relaxed);
            Ok((0..batch_size)
                .map(|i| {
                    let nonce = nonce_start.wrapping_add(i);
                    let mut digest = [0u8; 32];
                    digest[28..32].copy_from_slice(&nonce.to_le_bytes());
                    Candidate { nonce, digest }
                })
                .collect())
        }
    }

    impl DeviceLibrary for FakeLibrary {
        fn api_version(&self) -> u32 {
            self.version
        }

        fn name(&self) -> String {
            "fake/1.0".into()
        }

        fn device_count(&self) -> usize {
            self.devices
        }

        fn allocate_context(
            &self,
            device: usize,
            _algorithm: AlgorithmType,
            _tuning: &DeviceTuning,
        ) -> Result<Box<dyn DeviceContext>, MinerError> {
            if Some(device) == self.broken_device {
                return Err(MinerError::DeviceError(format!("device {} out of memory", device)));
            }
            Ok(Box::new(FakeContext {
                batches: self.batches.clone(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeLibrary;
    use super::*;

    #[test]
    fn missing_library_is_unavailable() {
        let backend = DeviceBackend::resolve(BackendKind::Cuda, None, None);
        assert!(!backend.is_live());
        assert!(backend.describe().contains("cuda"));

        let backend = DeviceBackend::resolve(BackendKind::OpenCl, None, Some(Path::new("/opt/libocl.so")));
        assert!(backend.describe().contains("/opt/libocl.so"));
    }

    #[test]
    fn version_mismatch_is_unavailable() {
        let mut library = FakeLibrary::new(1);
        library.version = DEVICE_API_VERSION + 1;
        let backend = DeviceBackend::resolve(BackendKind::Cuda, Some(Arc::new(library)), None);
        assert!(!backend.is_live());
    }

    #[test]
    fn library_without_devices_is_unavailable() {
        let backend = DeviceBackend::resolve(BackendKind::Cuda, Some(Arc::new(FakeLibrary::new(0))), None);
        assert!(backend.library().is_none());

        let backend = DeviceBackend::resolve(BackendKind::Cuda, Some(Arc::new(FakeLibrary::new(2))), None);
        assert!(backend.is_live());
        assert_eq!(backend.describe(), "fake/1.0");
    }
}
