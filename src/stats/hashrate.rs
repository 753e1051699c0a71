// src/stats/hashrate.rs
//! Windowed hashrate per lane
//!
//! Each lane owns a ring of `(timestamp, cumulative count)` samples. Exactly
//! one thread writes a given lane (the worker that owns it); any number of
//! threads read. A per-lane sequence counter lets readers detect a torn
//! snapshot and retry, so writers never block.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};
use std::time::Instant;

/// Samples kept per lane
const BUCKET_SIZE: usize = 2 << 11;
const BUCKET_MASK: usize = BUCKET_SIZE - 1;

/// Short reporting window in milliseconds
pub const SHORT_INTERVAL: u64 = 10_000;
/// Medium reporting window in milliseconds
pub const MEDIUM_INTERVAL: u64 = 60_000;
/// Long reporting window in milliseconds
pub const LARGE_INTERVAL: u64 = 900_000;

/// The three standard windows, short to long
pub const INTERVALS: [u64; 3] = [SHORT_INTERVAL, MEDIUM_INTERVAL, LARGE_INTERVAL];

struct Lane {
    seq: AtomicU64,
    top: AtomicUsize,
    counts: Box<[AtomicU64]>,
    stamps: Box<[AtomicU64]>,
}

impl Lane {
    fn new() -> Self {
        Lane {
            seq: AtomicU64::new(0),
            top: AtomicUsize::new(0),
            counts: (0..BUCKET_SIZE).map(|_| AtomicU64::new(0)).collect(),
            stamps: (0..BUCKET_SIZE).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn push(&self, count: u64, timestamp: u64) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let top = self.top.load(Ordering::Relaxed);
        let slot = top & BUCKET_MASK;
        self.stamps[slot].store(timestamp, Ordering::Relaxed);
        self.counts[slot].store(count, Ordering::Relaxed);
        self.top.store(top.wrapping_add(1), Ordering::Relaxed);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Rate over the trailing `interval`, `None` without a full window of history
    fn rate(&self, interval: u64, now: u64) -> Option<f64> {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let result = self.scan(interval, now);

            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return result;
            }
        }
    }

    fn scan(&self, interval: u64, now: u64) -> Option<f64> {
        let top = self.top.load(Ordering::Relaxed);
        let mut latest: Option<(u64, u64)> = None;
        let mut earliest: Option<(u64, u64)> = None;
        let mut full_set = false;

        for i in 1..BUCKET_SIZE {
            let slot = top.wrapping_sub(i) & BUCKET_MASK;
            let stamp = self.stamps[slot].load(Ordering::Relaxed);
            if stamp == 0 {
                break;
            }
            let count = self.counts[slot].load(Ordering::Relaxed);

            if latest.is_none() {
                latest = Some((stamp, count));
            }

            if now.saturating_sub(stamp) > interval {
                full_set = true;
                break;
            }
            earliest = Some((stamp, count));
        }

        let ((latest_ts, latest_count), (earliest_ts, earliest_count)) = (latest?, earliest?);
        if !full_set || latest_ts <= earliest_ts || latest_count < earliest_count {
            return None;
        }

        let hashes = (latest_count - earliest_count) as f64;
        let millis = (latest_ts - earliest_ts) as f64;
        Some(hashes / millis * 1000.0)
    }

    fn latest_count(&self) -> u64 {
        let top = self.top.load(Ordering::Acquire);
        if top == 0 {
            return 0;
        }
        self.counts[top.wrapping_sub(1) & BUCKET_MASK].load(Ordering::Relaxed)
    }
}

/// Hashrate samples for a fixed number of lanes
pub struct Hashrate {
    lanes: Vec<Lane>,
    started: Instant,
    highest: AtomicU64,
}

impl Hashrate {
    /// Creates storage for `threads` lanes
    pub fn new(threads: usize) -> Self {
        Self::started_at(threads, Instant::now())
    }

    fn started_at(threads: usize, started: Instant) -> Self {
        Hashrate {
            lanes: (0..threads).map(|_| Lane::new()).collect(),
            started,
            highest: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Storage whose clock started `age` ago, so tests can write past samples
    #[cfg(test)]
    pub(crate) fn backdated(threads: usize, age: std::time::Duration) -> Self {
        let started = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
        Self::started_at(threads, started)
    }

    /// Number of lanes
    pub fn threads(&self) -> usize {
        self.lanes.len()
    }

    /// Milliseconds since creation, never 0
    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64 + 1
    }

    /// Records the cumulative hash `count` of lane `index` at the current time
    pub fn add(&self, index: usize, count: u64) {
        self.add_at(index, count, self.now_ms());
    }

    /// Records a sample with an explicit timestamp in milliseconds
    ///
    /// Only the thread owning lane `index` may call this. Out-of-range
    /// indices are ignored.
    pub fn add_at(&self, index: usize, count: u64, timestamp: u64) {
        if let Some(lane) = self.lanes.get(index) {
            lane.push(count, timestamp.max(1));
        }
    }

    /// Normalized rate of lane `index` over the trailing `interval` ms
    pub fn calc(&self, index: usize, interval: u64) -> f64 {
        self.calc_at(index, interval, self.now_ms())
    }

    /// [`calc`](Self::calc) evaluated at an explicit time
    pub fn calc_at(&self, index: usize, interval: u64, now: u64) -> f64 {
        let rate = self
            .lanes
            .get(index)
            .and_then(|lane| lane.rate(interval, now))
            .unwrap_or(f64::NAN);
        normalize(rate)
    }

    /// Normalized sum of every lane's rate over the trailing `interval` ms
    pub fn calc_total(&self, interval: u64) -> f64 {
        self.calc_total_at(interval, self.now_ms())
    }

    /// [`calc_total`](Self::calc_total) evaluated at an explicit time
    pub fn calc_total_at(&self, interval: u64, now: u64) -> f64 {
        let mut total = 0.0;
        let mut any = false;
        for lane in &self.lanes {
            if let Some(rate) = lane.rate(interval, now) {
                total += rate;
                any = true;
            }
        }
        normalize(if any { total } else { f64::NAN })
    }

    /// Totals for the three standard windows
    pub fn totals(&self) -> [f64; 3] {
        let now = self.now_ms();
        INTERVALS.map(|interval| self.calc_total_at(interval, now))
    }

    /// Sum of the newest cumulative counts of every lane
    pub fn total_hashes(&self) -> u64 {
        self.lanes.iter().map(Lane::latest_count).sum()
    }

    /// Highest short-window total of these lanes seen so far
    ///
    /// Never decreases. This is the peak of one backend; the peak of the sum
    /// across backends is kept by the scheduler, since peaks of different
    /// backends need not coincide.
    pub fn highest(&self) -> f64 {
        f64::from_bits(self.highest.load(Ordering::Relaxed))
    }

    /// Folds the current short-window total into [`highest`](Self::highest)
    pub fn update_highest(&self) {
        self.update_highest_at(self.now_ms());
    }

    /// [`update_highest`](Self::update_highest) evaluated at an explicit time
    pub fn update_highest_at(&self, now: u64) {
        let current = self.calc_total_at(SHORT_INTERVAL, now);
        let _ = self.highest.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            (current > f64::from_bits(bits)).then(|| current.to_bits())
        });
    }
}

/// Coerces non-finite values to 0 and truncates to two decimals
pub fn normalize(value: f64) -> f64 {
    if !value.is_normal() {
        return 0.0;
    }
    (value * 100.0).floor() / 100.0
}

/// Human-readable rate, `n/a` when no rate is available
pub fn format(value: f64) -> String {
    if !value.is_normal() {
        return "n/a".to_string();
    }
    format!("{:.1}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn steady(rate: &Hashrate, index: usize, per_second: u64, seconds: u64) {
        for k in 1..=seconds {
            rate.add_at(index, k * per_second, k * 1000);
        }
    }

    #[test]
    fn steady_rate_over_short_window() {
        let rate = Hashrate::new(1);
        steady(&rate, 0, 100, 20);
        assert_eq!(rate.calc_at(0, SHORT_INTERVAL, 20_000), 100.0);
    }

    #[test]
    fn window_without_full_history_is_zero() {
        let rate = Hashrate::new(1);
        steady(&rate, 0, 100, 20);
        assert_eq!(rate.calc_at(0, MEDIUM_INTERVAL, 20_000), 0.0);
        assert_eq!(format(rate.calc_at(0, MEDIUM_INTERVAL, 20_000)), "n/a");
    }

    #[test]
    fn empty_and_unknown_lanes_are_zero() {
        let rate = Hashrate::new(2);
        assert_eq!(rate.calc_at(0, SHORT_INTERVAL, 5_000), 0.0);
        assert_eq!(rate.calc_at(7, SHORT_INTERVAL, 5_000), 0.0);
        assert_eq!(rate.calc_total_at(SHORT_INTERVAL, 5_000), 0.0);
    }

    #[test]
    fn total_sums_lanes() {
        let rate = Hashrate::new(2);
        steady(&rate, 0, 100, 20);
        steady(&rate, 1, 50, 20);
        assert_eq!(rate.calc_total_at(SHORT_INTERVAL, 20_000), 150.0);
        assert_eq!(rate.total_hashes(), 2000 + 1000);
    }

    #[test]
    fn normalize_truncates_and_clears_non_finite() {
        assert_eq!(normalize(12.3456), 12.34);
        assert_eq!(normalize(f64::NAN), 0.0);
        assert_eq!(normalize(f64::INFINITY), 0.0);
        assert_eq!(normalize(-0.0), 0.0);
    }

    #[test]
    fn ring_wraps_without_losing_recent_samples() {
        let rate = Hashrate::new(1);
        let samples = BUCKET_SIZE as u64 + 100;
        for k in 1..=samples {
            rate.add_at(0, k * 10, k * 100);
        }
        // 10 hashes per 100 ms
        assert_eq!(rate.calc_at(0, SHORT_INTERVAL, samples * 100), 100.0);
    }

    #[test]
    fn concurrent_reader_sees_consistent_rate() {
        let rate = Arc::new(Hashrate::new(1));
        let writer = {
            let rate = rate.clone();
            std::thread::spawn(move || {
                for k in 1..=20_000u64 {
                    rate.add_at(0, k * 5, k);
                }
            })
        };
        for _ in 0..1000 {
            let value = rate.calc_at(0, 100, 20_000);
            assert!(value == 0.0 || value == 5000.0, "torn read: {}", value);
        }
        writer.join().unwrap();
    }

    #[test]
    fn highest_keeps_the_peak() {
        let rate = Hashrate::new(1);
        steady(&rate, 0, 100, 20);
        rate.update_highest_at(20_000);
        assert_eq!(rate.highest(), 100.0);

        // slow down to 50 H/s for the next 20 seconds
        for k in 21..=40 {
            rate.add_at(0, 2000 + (k - 20) * 50, k * 1000);
        }
        rate.update_highest_at(40_000);
        assert_eq!(rate.calc_total_at(SHORT_INTERVAL, 40_000), 50.0);
        assert_eq!(rate.highest(), 100.0);
    }
}
