// src/topology/mod.rs
//! CPU topology and lane planning
//!
//! [`CpuTopology`] describes the machine as cache domains containing cores
//! containing processing units (PUs, hardware threads). [`plan`] turns it
//! into a list of [`LaneAssignment`]s so that the scratchpads of all lanes
//! sharing a cache fit inside it.

/// Cache-aware lane planner
pub mod planner;
/// Topology sources
pub mod provider;

pub use planner::{CoreFill, LaneAssignment, plan};
pub use provider::{BasicTopology, TopologyFile, TopologyProvider};

use serde::{Deserialize, Serialize};

/// Physical core and its hardware threads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Core {
    /// OS indices of the core's processing units
    pub pus: Vec<usize>,
}

/// Top-level cache shared by a set of cores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDomain {
    /// Cache level, 2 or 3
    pub level: u8,
    /// Size in bytes
    pub size: usize,
    /// Exclusive (victim) L3 that does not duplicate L2 contents
    #[serde(default)]
    pub exclusive: bool,
    /// Sizes of the L2 caches below an L3 domain
    #[serde(default)]
    pub l2: Vec<usize>,
    /// Cores under this cache
    pub cores: Vec<Core>,
}

impl CacheDomain {
    /// Processing units under this cache
    pub fn pu_count(&self) -> usize {
        self.cores.iter().map(|core| core.pus.len()).sum()
    }
}

/// Machine description consumed by the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTopology {
    /// CPU model name
    #[serde(default)]
    pub brand: String,
    /// Hardware threads
    pub threads: usize,
    /// Physical cores
    #[serde(default)]
    pub cores: usize,
    /// NUMA nodes
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Top-level cache domains; empty when cache information is unknown
    #[serde(default)]
    pub caches: Vec<CacheDomain>,
}

fn default_nodes() -> usize {
    1
}

impl CpuTopology {
    /// Topology with no cache information
    pub fn flat(brand: impl Into<String>, threads: usize, cores: usize) -> Self {
        CpuTopology {
            brand: brand.into(),
            threads: threads.max(1),
            cores,
            nodes: 1,
            caches: Vec::new(),
        }
    }

    /// Total L2 in bytes
    pub fn l2(&self) -> usize {
        self.caches
            .iter()
            .map(|cache| {
                if cache.level == 2 {
                    cache.size
                } else {
                    cache.l2.iter().sum()
                }
            })
            .sum()
    }

    /// Total L3 in bytes
    pub fn l3(&self) -> usize {
        self.caches.iter().filter(|cache| cache.level == 3).map(|cache| cache.size).sum()
    }

    /// Whether the planner has cache domains to work with
    pub fn has_cache_info(&self) -> bool {
        !self.caches.is_empty()
    }
}
