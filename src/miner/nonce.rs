// src/miner/nonce.rs
//! Job generation counters shared by every lane
//!
//! One [`NonceCoordinator`] is created per process and handed to every
//! backend and worker as an `Arc`. It holds a generation counter per
//! [`BackendKind`] plus a global pause flag. Hot loops only ever perform one
//! atomic load against it per poll.

use crate::types::BackendKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sequence value that tells every lane of a kind to terminate
pub const SEQUENCE_STOPPED: u64 = 0;

/// Per-backend-kind generation counters and the global pause flag
#[derive(Debug)]
pub struct NonceCoordinator {
    sequences: [AtomicU64; 3],
    paused: AtomicBool,
    shutdown: AtomicBool,
}

impl Default for NonceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceCoordinator {
    /// Creates a coordinator with every kind at generation 1
    pub fn new() -> Self {
        NonceCoordinator {
            sequences: [AtomicU64::new(1), AtomicU64::new(1), AtomicU64::new(1)],
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Current generation for `kind`; `0` means stop
    #[inline]
    pub fn sequence(&self, kind: BackendKind) -> u64 {
        self.sequences[kind.index()].load(Ordering::Acquire)
    }

    /// `true` iff `local` no longer matches the current generation
    ///
    /// Covers both "a newer job arrived" and "shutdown" (generation 0).
    #[inline]
    pub fn is_outdated(&self, kind: BackendKind, local: u64) -> bool {
        self.sequence(kind) != local
    }

    /// Global pause flag, independent of the generation counters
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Sets the global pause flag; returns the previous value
    pub fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::AcqRel)
    }

    /// Bumps the generation of `kind`
    ///
    /// A stopped kind stays stopped: touching generation 0 is a no-op.
    pub fn touch(&self, kind: BackendKind) {
        let _ = self.sequences[kind.index()].fetch_update(Ordering::AcqRel, Ordering::Acquire, |seq| {
            if seq == SEQUENCE_STOPPED {
                None
            } else {
                Some(seq.wrapping_add(1).max(1))
            }
        });
    }

    /// Bumps every kind, used on pause -> resume
    pub fn touch_all(&self) {
        for kind in BackendKind::ALL {
            self.touch(kind);
        }
    }

    /// Sets the generation of `kind` to 0 so every lane of it terminates
    pub fn stop(&self, kind: BackendKind) {
        self.sequences[kind.index()].store(SEQUENCE_STOPPED, Ordering::Release);
    }

    /// Re-arms a stopped kind for a fresh set of lanes
    ///
    /// Only valid once every lane that observed the stop has exited. Returns
    /// `false` after [`shutdown`](Self::shutdown): process shutdown is terminal.
    pub fn rearm(&self, kind: BackendKind) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let _ = self.sequences[kind.index()].compare_exchange(
            SEQUENCE_STOPPED,
            1,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if self.is_shutdown() {
            // lost a race with shutdown()
            self.stop(kind);
            return false;
        }
        true
    }

    /// Stops every kind for good
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        for kind in BackendKind::ALL {
            self.stop(kind);
        }
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one_for_every_kind() {
        let nonce = NonceCoordinator::new();
        for kind in BackendKind::ALL {
            assert_eq!(nonce.sequence(kind), 1);
        }
        assert!(!nonce.is_paused());
    }

    #[test]
    fn touch_is_observed_exactly_once() {
        let nonce = NonceCoordinator::new();
        let mut local = nonce.sequence(BackendKind::Cpu);
        assert!(!nonce.is_outdated(BackendKind::Cpu, local));

        nonce.touch(BackendKind::Cpu);
        assert!(nonce.is_outdated(BackendKind::Cpu, local));
        local = nonce.sequence(BackendKind::Cpu);
        assert!(!nonce.is_outdated(BackendKind::Cpu, local));

        // other kinds are untouched
        assert!(!nonce.is_outdated(BackendKind::Cuda, 1));
    }

    #[test]
    fn stop_is_observed_as_outdated_and_sticks() {
        let nonce = NonceCoordinator::new();
        let local = nonce.sequence(BackendKind::OpenCl);
        nonce.stop(BackendKind::OpenCl);
        assert!(nonce.is_outdated(BackendKind::OpenCl, local));
        nonce.touch(BackendKind::OpenCl);
        assert_eq!(nonce.sequence(BackendKind::OpenCl), SEQUENCE_STOPPED);
    }

    #[test]
    fn rearm_only_before_shutdown() {
        let nonce = NonceCoordinator::new();
        nonce.stop(BackendKind::Cpu);
        assert!(nonce.rearm(BackendKind::Cpu));
        assert_eq!(nonce.sequence(BackendKind::Cpu), 1);

        nonce.shutdown();
        assert!(!nonce.rearm(BackendKind::Cpu));
        for kind in BackendKind::ALL {
            assert_eq!(nonce.sequence(kind), SEQUENCE_STOPPED);
        }
    }

    #[test]
    fn pause_flag_does_not_move_sequences() {
        let nonce = NonceCoordinator::new();
        assert!(!nonce.set_paused(true));
        assert!(nonce.is_paused());
        assert_eq!(nonce.sequence(BackendKind::Cpu), 1);
        assert!(nonce.set_paused(false));
    }
}
