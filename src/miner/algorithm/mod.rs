// src/miner/algorithm/mod.rs
//! Hash algorithm capability
//!
//! The engine never implements a hash function itself. It consumes anything
//! implementing [`Algorithm`], looked up by [`AlgorithmType`] through an
//! [`AlgorithmRegistry`]. The built-in registry carries the CryptoNight
//! binding; tests and embedders can register their own.

/// CryptoNight algorithm implementation
///
/// Binds the `cryptonight-rs` crate for the `cn/*` variants.
pub mod cryptonight;

use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use std::collections::HashMap;
use std::sync::Arc;

/// Known input/digest pair used by the construction-time self-test
#[derive(Debug, Clone, Copy)]
pub struct TestVector {
    /// Bytes to hash
    pub input: &'static [u8],
    /// Expected digest
    pub output: [u8; 32],
}

/// Common interface for all hash implementations
pub trait Algorithm: Send + Sync {
    /// Algorithm variant this instance computes
    fn algorithm_type(&self) -> AlgorithmType;

    /// Compute the digest of `input`
    ///
    /// `scratchpad` is the calling lane's exclusive working memory, at least
    /// `algorithm_type().memory()` bytes long. Implementations that manage
    /// their own memory may ignore it.
    fn hash(&self, input: &[u8], scratchpad: &mut [u8]) -> Result<[u8; 32], MinerError>;

    /// Reference digest for the self-test, `None` if the implementation has none
    fn test_vector(&self) -> Option<TestVector>;

    /// Hashes the reference input and compares byte-for-byte
    fn self_test(&self, scratchpad: &mut [u8]) -> Result<(), MinerError> {
        let vector = self.test_vector().ok_or_else(|| {
            MinerError::SelfTestFailed(format!("{} has no reference digest", self.algorithm_type()))
        })?;

        let digest = self.hash(vector.input, scratchpad)?;
        if digest != vector.output {
            return Err(MinerError::SelfTestFailed(format!(
                "{} produced {} instead of {}",
                self.algorithm_type(),
                hex::encode(digest),
                hex::encode(vector.output)
            )));
        }
        Ok(())
    }
}

/// Lookup table from algorithm id to implementation
#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    algorithms: HashMap<AlgorithmType, Arc<dyn Algorithm>>,
}

impl AlgorithmRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every implementation bundled in this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for algorithm in cryptonight::CryptoNightAlgo::SUPPORTED {
            if let Ok(algo) = cryptonight::CryptoNightAlgo::new(algorithm) {
                registry.register(Arc::new(algo));
            }
        }
        registry
    }

    /// Adds or replaces the implementation for its algorithm type
    pub fn register(&mut self, algorithm: Arc<dyn Algorithm>) {
        self.algorithms.insert(algorithm.algorithm_type(), algorithm);
    }

    /// Implementation for `algorithm`
    pub fn get(&self, algorithm: AlgorithmType) -> Result<Arc<dyn Algorithm>, MinerError> {
        self.algorithms
            .get(&algorithm)
            .cloned()
            .ok_or_else(|| MinerError::AlgorithmError(format!("no implementation for {}", algorithm)))
    }

    /// Whether an implementation is registered
    pub fn supports(&self, algorithm: AlgorithmType) -> bool {
        self.algorithms.contains_key(&algorithm)
    }

    /// Every registered implementation of `algorithm`'s family
    pub fn family(&self, algorithm: AlgorithmType) -> Vec<Arc<dyn Algorithm>> {
        algorithm
            .siblings()
            .filter_map(|sibling| self.algorithms.get(&sibling).cloned())
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::NonceEcho;
    use super::*;

    #[test]
    fn family_lookup_returns_registered_siblings() {
        let mut registry = AlgorithmRegistry::new();
        registry.register(Arc::new(NonceEcho::new(AlgorithmType::CnV0)));
        registry.register(Arc::new(NonceEcho::new(AlgorithmType::CnV1)));
        registry.register(Arc::new(NonceEcho::new(AlgorithmType::CnLiteV0)));

        let family: Vec<_> = registry
            .family(AlgorithmType::CnV1)
            .iter()
            .map(|a| a.algorithm_type())
            .collect();
        assert_eq!(family, vec![AlgorithmType::CnV0, AlgorithmType::CnV1]);
        assert!(registry.get(AlgorithmType::CnHeavyV0).is_err());
    }

    #[test]
    fn self_test_detects_mismatch() {
        let mut scratchpad = vec![0u8; 64];
        let good = NonceEcho::new(AlgorithmType::CnV0);
        assert!(good.self_test(&mut scratchpad).is_ok());

        let bad = NonceEcho { algorithm: AlgorithmType::CnV0, broken: true };
        assert!(matches!(bad.self_test(&mut scratchpad), Err(MinerError::SelfTestFailed(_))));
    }

    #[test]
    fn defaults_cover_cryptonight_variants() {
        let registry = AlgorithmRegistry::with_defaults();
        assert!(registry.supports(AlgorithmType::CnV0));
        assert!(registry.supports(AlgorithmType::CnV1));
        assert!(!registry.supports(AlgorithmType::CnHeavyV0));
    }
}
