// src/topology/planner.rs
//! Cache-aware lane planning
//!
//! For each top-level cache domain of size `S` and a per-lane scratchpad of
//! `P` bytes the domain gets `floor(S / P)` lanes, never more than it has
//! PUs. An exclusive L3 also counts one extra scratchpad per L2 below it
//! that can hold one. Lanes are pinned one per PU.

use crate::topology::{CacheDomain, CpuTopology};
use crate::types::AlgorithmType;
use serde::{Deserialize, Serialize};

/// How lanes fill cores when a cache cannot feed every PU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CoreFill {
    /// Use every PU of a core before moving to the next core
    #[default]
    Pack,
    /// One PU per core first, then second PUs
    Spread,
}

/// One planned CPU worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneAssignment {
    /// Lanes (parallel hashes) the worker runs
    pub intensity: usize,
    /// PU to pin to; `None` leaves placement to the OS
    pub affinity: Option<usize>,
}

/// Reference scratchpad used to scale the flat fallback
const FALLBACK_UNIT: usize = 1024 * 1024;

/// Plans CPU lanes for `algorithm` on `topology`
///
/// # Arguments
/// * `algorithm` - Algorithm whose scratchpad size drives the plan
/// * `topology` - Machine description
/// * `fill` - Core fill order when a cache is the bottleneck
///
/// # Returns
/// One [`LaneAssignment`] per worker, in PU order per domain
pub fn plan(algorithm: AlgorithmType, topology: &CpuTopology, fill: CoreFill) -> Vec<LaneAssignment> {
    plan_for_scratchpad(algorithm.memory(), topology, fill)
}

/// [`plan`] for an explicit scratchpad size in bytes
pub fn plan_for_scratchpad(scratchpad: usize, topology: &CpuTopology, fill: CoreFill) -> Vec<LaneAssignment> {
    let scratchpad = scratchpad.max(1);

    if !topology.has_cache_info() {
        // scale by memory footprint: lite gets every thread, heavy a quarter
        let threads = (topology.threads * FALLBACK_UNIT / scratchpad).max(1);
        return (0..threads)
            .map(|_| LaneAssignment {
                intensity: 1,
                affinity: None,
            })
            .collect();
    }

    let mut lanes = Vec::new();
    for domain in &topology.caches {
        plan_domain(domain, scratchpad, fill, &mut lanes);
    }
    lanes
}

/// Effective cache capacity of a domain in bytes
fn capacity(domain: &CacheDomain, scratchpad: usize) -> usize {
    let mut size = domain.size;
    if domain.level == 3 && domain.exclusive {
        size += domain.l2.iter().filter(|l2| **l2 >= scratchpad).count() * scratchpad;
    }
    size
}

fn plan_domain(domain: &CacheDomain, scratchpad: usize, fill: CoreFill, lanes: &mut Vec<LaneAssignment>) {
    let pus = domain.pu_count();
    if pus == 0 {
        return;
    }
    let quota = (capacity(domain, scratchpad) / scratchpad).min(pus);

    let pinned = |pu: usize| LaneAssignment {
        intensity: 1,
        affinity: Some(pu),
    };

    if quota == pus {
        lanes.extend(domain.cores.iter().flat_map(|core| core.pus.iter().copied()).map(pinned));
        return;
    }

    match fill {
        CoreFill::Pack => {
            lanes.extend(
                domain
                    .cores
                    .iter()
                    .flat_map(|core| core.pus.iter().copied())
                    .take(quota)
                    .map(pinned),
            );
        }
        CoreFill::Spread => {
            let depth = domain.cores.iter().map(|core| core.pus.len()).max().unwrap_or(0);
            lanes.extend(
                (0..depth)
                    .flat_map(|pu_index| domain.cores.iter().filter_map(move |core| core.pus.get(pu_index).copied()))
                    .take(quota)
                    .map(pinned),
            );
        }
    }
}
