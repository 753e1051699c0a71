// src/miner/algorithm/cryptonight.rs
//! CryptoNight algorithm implementation
//!
//! Wraps the `cryptonight` library for the original CryptoNight family:
//! - CryptoNight (variant 0)
//! - CryptoNight V7 (variant 1)
//!
//! The library allocates its own scratchpad, so the lane scratchpad handed to
//! [`Algorithm::hash`] is left untouched.

use crate::miner::algorithm::{Algorithm, TestVector};
use crate::types::{AlgorithmFamily, AlgorithmType};
use crate::utils::error::MinerError;
use cryptonight::cryptonight;
use hex_literal::hex;

/// Reference input for variant 0
const V0_INPUT: &[u8] = b"This is a test";
/// Reference input for variant 1, which needs at least 43 bytes
const V1_INPUT: &[u8] = &[0u8; 43];

/// CryptoNight algorithm implementation
pub struct CryptoNightAlgo {
    algorithm: AlgorithmType,
}

impl CryptoNightAlgo {
    /// Variants this binding can compute
    pub const SUPPORTED: [AlgorithmType; 2] = [AlgorithmType::CnV0, AlgorithmType::CnV1];

    /// Creates a new CryptoNight instance for `algorithm`
    ///
    /// # Arguments
    /// * `algorithm` - One of [`Self::SUPPORTED`]
    ///
    /// # Returns
    /// - `Ok(CryptoNightAlgo)` for a `cn/*` variant
    /// - `Err(MinerError::AlgorithmError)` for lite/heavy variants, which the
    ///   library does not provide
    pub fn new(algorithm: AlgorithmType) -> Result<Self, MinerError> {
        if algorithm.family() != AlgorithmFamily::CryptoNight {
            return Err(MinerError::AlgorithmError(format!(
                "{} is not provided by the cryptonight library",
                algorithm
            )));
        }
        Ok(Self { algorithm })
    }
}

impl Algorithm for CryptoNightAlgo {
    fn algorithm_type(&self) -> AlgorithmType {
        self.algorithm
    }

    /// Computes a CryptoNight hash of the full blob
    ///
    /// The nonce is already embedded in `input` at its fixed offset.
    fn hash(&self, input: &[u8], _scratchpad: &mut [u8]) -> Result<[u8; 32], MinerError> {
        let hash = cryptonight(input, input.len(), self.algorithm.variant());
        <[u8; 32]>::try_from(hash.as_slice()).map_err(|_| {
            MinerError::AlgorithmError(format!("{} returned {} bytes", self.algorithm, hash.len()))
        })
    }

    fn test_vector(&self) -> Option<TestVector> {
        match self.algorithm {
            AlgorithmType::CnV0 => Some(TestVector {
                input: V0_INPUT,
                output: hex!("a084f01d1437a09c6985401b60d43554ae105802c5f5d8a9b3253649c0be6605"),
            }),
            AlgorithmType::CnV1 => Some(TestVector {
                input: V1_INPUT,
                output: hex!("b5a7f63abb94d07d1a6445c36c07c7e8327fe61b1647e391b4c7edae5de57a3d"),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_other_families() {
        assert!(CryptoNightAlgo::new(AlgorithmType::CnLiteV1).is_err());
        assert!(CryptoNightAlgo::new(AlgorithmType::CnHeavyV0).is_err());
        assert!(CryptoNightAlgo::new(AlgorithmType::CnV1).is_ok());
    }

    #[test]
    fn every_supported_variant_has_a_vector() {
        for algorithm in CryptoNightAlgo::SUPPORTED {
            let algo = CryptoNightAlgo::new(algorithm).unwrap();
            assert!(algo.test_vector().is_some(), "{} lacks a vector", algorithm);
        }
    }

    #[test]
    #[ignore = "runs the native CryptoNight implementation"]
    fn v0_matches_reference_digest() {
        let algo = CryptoNightAlgo::new(AlgorithmType::CnV0).unwrap();
        let mut scratchpad = Vec::new();
        algo.self_test(&mut scratchpad).unwrap();
    }
}
