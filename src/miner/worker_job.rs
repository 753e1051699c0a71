// src/miner/worker_job.rs
//! Per lane-group job cursor
//!
//! A [`WorkerJob`] is owned by exactly one worker. It keeps its own copy of
//! the current [`Job`], one blob replica per lane (so every lane can write a
//! different nonce) and the generation the job was captured at.
//!
//! Nonce space is split by `total_ways`: lane `i` of a group at `offset`
//! starts at `(u32::MAX / total_ways) * (offset + i)`. As long as every
//! group of a backend kind uses the same `total_ways`, no two lanes ever
//! start inside each other's range. Running past the end of a range wraps
//! modulo 2^32; that costs throughput, not correctness, and is reported.

use crate::miner::job::{Job, MAX_BLOB_SIZE, read_nonce, write_nonce};

const NICEHASH_MASK: u32 = 0xFF00_0000;
const NICEHASH_SPACE: u32 = 0x00FF_FFFF;

/// Outcome of [`WorkerJob::consume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Equal job re-delivered, nothing moved
    Unchanged,
    /// Pause job consumed; lanes must not hash
    Paused,
    /// Same job came back after a pause; cursors restored verbatim
    Resumed,
    /// New job; lanes re-partitioned
    Replaced,
}

#[derive(Clone)]
struct LaneSet {
    job: Job,
    blobs: Vec<[u8; MAX_BLOB_SIZE]>,
}

/// First nonce of `way` when nonce space is split `total_ways` times
///
/// `base` is the blob's original nonce; only its top byte survives, and only
/// for nicehash jobs.
pub fn partition_start(total_ways: u32, way: u32, nicehash: bool, base: u32) -> u32 {
    let total_ways = total_ways.max(1);
    if nicehash {
        (base & NICEHASH_MASK).wrapping_add((NICEHASH_SPACE / total_ways).wrapping_mul(way))
    } else {
        (u32::MAX / total_ways).wrapping_mul(way)
    }
}

/// Adds `step` to a nonce; returns the new nonce and whether it wrapped
///
/// Nicehash nonces wrap inside their low 24 bits so the pool's byte stays.
pub fn step_nonce(nonce: u32, step: u64, nicehash: bool) -> (u32, bool) {
    if nicehash {
        let low = u64::from(nonce & NICEHASH_SPACE) + step;
        let wrapped = low > u64::from(NICEHASH_SPACE);
        ((nonce & NICEHASH_MASK) | (low as u32 & NICEHASH_SPACE), wrapped)
    } else {
        let next = u64::from(nonce) + step;
        (next as u32, next > u64::from(u32::MAX))
    }
}

/// Mutable job cursor of one lane-group
pub struct WorkerJob {
    lanes: usize,
    total_ways: u32,
    offset: u32,
    sequence: u64,
    state: LaneSet,
    paused_state: Option<LaneSet>,
}

impl WorkerJob {
    /// Creates a cursor for `lanes` lanes sitting at `offset` of `total_ways`
    pub fn new(lanes: usize, total_ways: u32, offset: u32) -> Self {
        let lanes = lanes.max(1);
        WorkerJob {
            lanes,
            total_ways: total_ways.max(1),
            offset,
            sequence: 0,
            state: LaneSet {
                job: Job::paused(),
                blobs: vec![[0u8; MAX_BLOB_SIZE]; lanes],
            },
            paused_state: None,
        }
    }

    /// Takes `job`, captured at generation `sequence`
    ///
    /// An equal job leaves every cursor alone. Switching to the pause job
    /// snapshots the running lanes; getting the same job id back afterwards
    /// restores that snapshot instead of re-partitioning.
    pub fn consume(&mut self, job: &Job, sequence: u64) -> Transition {
        self.sequence = sequence;

        if self.state.job == *job {
            return Transition::Unchanged;
        }

        if !job.is_active() && self.state.job.is_active() {
            self.paused_state = Some(self.state.clone());
        }

        if !self.state.job.is_active() && job.is_active() {
            if let Some(paused) = self.paused_state.take_if(|p| p.job.id() == job.id()) {
                self.state = paused;
                return Transition::Resumed;
            }
        }

        self.state.job = job.clone();
        if !job.is_active() {
            return Transition::Paused;
        }

        let size = job.size();
        let nicehash = job.is_nicehash();
        for (i, blob) in self.state.blobs.iter_mut().enumerate() {
            blob.fill(0);
            blob[..size].copy_from_slice(job.blob());
            let way = self.offset.wrapping_add(i as u32);
            let start = partition_start(self.total_ways, way, nicehash, read_nonce(blob));
            write_nonce(blob, start);
        }

        Transition::Replaced
    }

    /// Advances every lane by `reserve_count * ways`
    ///
    /// Used after a batch so the next batch starts past it. Returns `true`
    /// if any lane wrapped around its nonce space.
    pub fn next_round(&mut self, reserve_count: u32, ways: u32) -> bool {
        let step = u64::from(reserve_count) * u64::from(ways.max(1));
        let mut wrapped = false;
        for lane in 0..self.lanes {
            wrapped |= self.advance_by(lane, step);
        }
        wrapped
    }

    /// Advances one lane by a single nonce; `true` on wraparound
    pub fn advance(&mut self, lane: usize) -> bool {
        self.advance_by(lane, 1)
    }

    fn advance_by(&mut self, lane: usize, step: u64) -> bool {
        let nicehash = self.state.job.is_nicehash();
        let blob = &mut self.state.blobs[lane];
        let (next, wrapped) = step_nonce(read_nonce(blob), step, nicehash);
        write_nonce(blob, next);
        wrapped
    }

    /// Current nonce of `lane`
    pub fn nonce(&self, lane: usize) -> u32 {
        read_nonce(&self.state.blobs[lane])
    }

    /// Blob replica of `lane`, nonce included
    pub fn blob(&self, lane: usize) -> &[u8] {
        &self.state.blobs[lane][..self.state.job.size()]
    }

    /// Job the lanes are working on
    pub fn job(&self) -> &Job {
        &self.state.job
    }

    /// Generation captured by the last [`consume`](Self::consume)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of lanes in this group
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Whether a pause snapshot is being held
    pub fn has_paused_state(&self) -> bool {
        self.paused_state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::job::MIN_BLOB_SIZE;
    use crate::types::AlgorithmType;
    use std::collections::HashSet;

    fn job(id: &str, target: &str) -> Job {
        Job::from_hex(0, id, AlgorithmType::CnV0, &"00".repeat(MIN_BLOB_SIZE), target, false).unwrap()
    }

    fn nicehash_job(id: &str) -> Job {
        let mut blob = vec![0u8; MIN_BLOB_SIZE];
        write_nonce(&mut blob, 0x7a00_0000);
        Job::from_hex(0, id, AlgorithmType::CnV0, &hex::encode(blob), "0100", true).unwrap()
    }

    #[test]
    fn partition_starts_are_disjoint_and_increasing() {
        for ways in 1..=64u32 {
            for nicehash in [false, true] {
                let starts: Vec<u32> = (0..ways)
                    .map(|way| partition_start(ways, way, nicehash, 0x7a00_0000))
                    .collect();
                let unique: HashSet<_> = starts.iter().collect();
                assert_eq!(unique.len(), ways as usize, "ways={} nicehash={}", ways, nicehash);
                assert!(starts.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn four_lanes_split_nonce_space_evenly() {
        let mut cursor = WorkerJob::new(4, 4, 0);
        assert_eq!(cursor.consume(&job("a", "0100"), 1), Transition::Replaced);
        let nonces: Vec<u32> = (0..4).map(|i| cursor.nonce(i)).collect();
        assert_eq!(nonces, vec![0, 0x3FFF_FFFF, 0x7FFF_FFFE, 0xBFFF_FFFD]);
    }

    #[test]
    fn groups_at_different_offsets_match_one_wide_group() {
        let wide = {
            let mut cursor = WorkerJob::new(4, 8, 2);
            cursor.consume(&job("a", "0100"), 1);
            (0..4).map(|i| cursor.nonce(i)).collect::<Vec<_>>()
        };
        let narrow: Vec<u32> = (2..6)
            .map(|offset| {
                let mut cursor = WorkerJob::new(1, 8, offset);
                cursor.consume(&job("a", "0100"), 1);
                cursor.nonce(0)
            })
            .collect();
        assert_eq!(wide, narrow);
    }

    #[test]
    fn nicehash_keeps_pool_byte() {
        let mut cursor = WorkerJob::new(2, 2, 0);
        cursor.consume(&nicehash_job("n"), 1);
        assert_eq!(cursor.nonce(0), 0x7a00_0000);
        assert_eq!(cursor.nonce(1), 0x7a00_0000 + 0x007F_FFFF);

        // wrap stays inside the low 24 bits
        assert!(cursor.next_round(0x0080_0001, 1));
        assert_eq!(cursor.nonce(1) & NICEHASH_MASK, 0x7a00_0000);
    }

    #[test]
    fn identical_job_is_a_no_op() {
        let mut cursor = WorkerJob::new(2, 2, 0);
        cursor.consume(&job("a", "0100"), 5);
        cursor.advance(0);
        cursor.advance(1);
        let before: Vec<u32> = (0..2).map(|i| cursor.nonce(i)).collect();

        assert_eq!(cursor.consume(&job("a", "0100"), 5), Transition::Unchanged);
        let after: Vec<u32> = (0..2).map(|i| cursor.nonce(i)).collect();
        assert_eq!(before, after);
        assert_eq!(cursor.sequence(), 5);
    }

    #[test]
    fn pause_then_resume_restores_cursors() {
        let mut cursor = WorkerJob::new(3, 3, 0);
        cursor.consume(&job("a", "0100"), 1);
        for _ in 0..17 {
            cursor.next_round(1, 1);
        }
        cursor.advance(2);
        let before: Vec<Vec<u8>> = (0..3).map(|i| cursor.blob(i).to_vec()).collect();

        assert_eq!(cursor.consume(&Job::paused(), 2), Transition::Paused);
        assert!(cursor.has_paused_state());
        assert!(!cursor.job().is_active());

        assert_eq!(cursor.consume(&job("a", "0100"), 3), Transition::Resumed);
        let after: Vec<Vec<u8>> = (0..3).map(|i| cursor.blob(i).to_vec()).collect();
        assert_eq!(before, after);
        assert_eq!(cursor.sequence(), 3);
        assert!(!cursor.has_paused_state());
    }

    #[test]
    fn resume_with_other_job_repartitions() {
        let mut cursor = WorkerJob::new(2, 2, 0);
        cursor.consume(&job("a", "0100"), 1);
        cursor.next_round(100, 1);
        cursor.consume(&Job::paused(), 2);

        assert_eq!(cursor.consume(&job("b", "0100"), 3), Transition::Replaced);
        assert_eq!(cursor.nonce(0), 0);
        assert_eq!(cursor.nonce(1), u32::MAX / 2);
    }

    #[test]
    fn next_round_scales_by_ways() {
        let mut cursor = WorkerJob::new(2, 2, 0);
        cursor.consume(&job("a", "0100"), 1);
        assert!(!cursor.next_round(32, 4));
        assert_eq!(cursor.nonce(0), 128);
        assert_eq!(cursor.nonce(1), u32::MAX / 2 + 128);
    }

    #[test]
    fn wraparound_is_reported_not_corrected() {
        let mut cursor = WorkerJob::new(2, 2, 0);
        cursor.consume(&job("a", "0100"), 1);
        // lane 1 starts at 0x7FFF_FFFF, push it past u32::MAX
        assert!(cursor.next_round(0x8000_0001, 1));
        assert_eq!(cursor.nonce(1), 0);
        assert_eq!(cursor.nonce(0), 0x8000_0001);
    }
}
