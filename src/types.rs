// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Algorithm families sharing one scratchpad geometry
///
/// Lanes are planned per family: switching between variants of the same
/// family keeps the running lane layout, switching family forces a re-plan.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmFamily {
    /// CryptoNight, 2 MiB scratchpad
    CryptoNight,
    /// CryptoNight-Lite, 1 MiB scratchpad
    CryptoNightLite,
    /// CryptoNight-Heavy, 4 MiB scratchpad
    CryptoNightHeavy,
}

impl AlgorithmFamily {
    /// Scratchpad bytes one lane needs for this family
    pub fn memory(self) -> usize {
        match self {
            AlgorithmFamily::CryptoNight => 2 * MIB,
            AlgorithmFamily::CryptoNightLite => MIB,
            AlgorithmFamily::CryptoNightHeavy => 4 * MIB,
        }
    }
}

/// Supported proof-of-work algorithms (family + variant)
///
/// The variant number is what gets handed to the hash implementation;
/// the family decides scratchpad size and therefore lane planning.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum AlgorithmType {
    /// Original CryptoNight
    #[clap(name = "cn/0")]
    #[serde(rename = "cn/0")]
    CnV0,

    /// CryptoNight variant 1 (a.k.a. v7)
    #[clap(name = "cn/1")]
    #[serde(rename = "cn/1")]
    CnV1,

    /// CryptoNight-Lite
    #[clap(name = "cn-lite/0")]
    #[serde(rename = "cn-lite/0")]
    CnLiteV0,

    /// CryptoNight-Lite variant 1
    #[clap(name = "cn-lite/1")]
    #[serde(rename = "cn-lite/1")]
    CnLiteV1,

    /// CryptoNight-Heavy
    #[clap(name = "cn-heavy/0")]
    #[serde(rename = "cn-heavy/0")]
    CnHeavyV0,
}

impl AlgorithmType {
    /// Every algorithm this build knows about
    pub const ALL: [AlgorithmType; 5] = [
        AlgorithmType::CnV0,
        AlgorithmType::CnV1,
        AlgorithmType::CnLiteV0,
        AlgorithmType::CnLiteV1,
        AlgorithmType::CnHeavyV0,
    ];

    /// Family this algorithm belongs to
    pub fn family(self) -> AlgorithmFamily {
        match self {
            AlgorithmType::CnV0 | AlgorithmType::CnV1 => AlgorithmFamily::CryptoNight,
            AlgorithmType::CnLiteV0 | AlgorithmType::CnLiteV1 => AlgorithmFamily::CryptoNightLite,
            AlgorithmType::CnHeavyV0 => AlgorithmFamily::CryptoNightHeavy,
        }
    }

    /// Variant number passed to the hash implementation
    pub fn variant(self) -> i32 {
        match self {
            AlgorithmType::CnV0 | AlgorithmType::CnLiteV0 | AlgorithmType::CnHeavyV0 => 0,
            AlgorithmType::CnV1 | AlgorithmType::CnLiteV1 => 1,
        }
    }

    /// Scratchpad bytes required per lane
    pub fn memory(self) -> usize {
        self.family().memory()
    }

    /// Variants sharing this algorithm's family
    pub fn siblings(self) -> impl Iterator<Item = AlgorithmType> {
        let family = self.family();
        Self::ALL.into_iter().filter(move |a| a.family() == family)
    }
}

impl fmt::Display for AlgorithmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmFamily::CryptoNight => write!(f, "cn"),
            AlgorithmFamily::CryptoNightLite => write!(f, "cn-lite"),
            AlgorithmFamily::CryptoNightHeavy => write!(f, "cn-heavy"),
        }
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmType::CnV0 => write!(f, "cn/0"),
            AlgorithmType::CnV1 => write!(f, "cn/1"),
            AlgorithmType::CnLiteV0 => write!(f, "cn-lite/0"),
            AlgorithmType::CnLiteV1 => write!(f, "cn-lite/1"),
            AlgorithmType::CnHeavyV0 => write!(f, "cn-heavy/0"),
        }
    }
}

impl FromStr for AlgorithmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cn/0" | "cryptonight" => Ok(AlgorithmType::CnV0),
            "cn/1" | "cnv7" | "cryptonight-v7" | "cryptonight/1" => Ok(AlgorithmType::CnV1),
            "cn-lite/0" | "cryptonight-lite" => Ok(AlgorithmType::CnLiteV0),
            "cn-lite/1" | "cryptonight-lite/1" => Ok(AlgorithmType::CnLiteV1),
            "cn-heavy/0" | "cryptonight-heavy" => Ok(AlgorithmType::CnHeavyV0),
            _ => Err(format!("Unknown algorithm: {}", s)),
        }
    }
}

/// Compute backend kinds, each with its own job generation counter
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU lanes
    Cpu,
    /// CUDA devices
    Cuda,
    /// OpenCL devices
    OpenCl,
}

impl BackendKind {
    /// Every backend kind, in coordinator slot order
    pub const ALL: [BackendKind; 3] = [BackendKind::Cpu, BackendKind::Cuda, BackendKind::OpenCl];

    /// Coordinator slot index
    pub fn index(self) -> usize {
        match self {
            BackendKind::Cpu => 0,
            BackendKind::Cuda => 1,
            BackendKind::OpenCl => 2,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
            BackendKind::Cuda => write!(f, "cuda"),
            BackendKind::OpenCl => write!(f, "opencl"),
        }
    }
}
