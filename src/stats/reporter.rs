// src/stats/reporter.rs
use crate::miner::job::JobResult;
use crate::miner::scheduler::Scheduler;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::{Components, System};

/// Granularity at which the reporting thread notices shutdown
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

/// Statistics related to engine performance
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Total number of hashes computed by running lanes
    pub hashes_total: u64,
    /// Number of results that met their job target
    pub results: u64,
    /// Difficulty of the best result so far
    pub best_diff: u64,
    /// Hashrate over 10 seconds (hashes per second)
    pub hashrate_10s: f64,
    /// Hashrate over 1 minute (hashes per second)
    pub hashrate_1m: f64,
    /// Hashrate over 15 minutes (hashes per second)
    pub hashrate_15m: f64,
    /// Highest 10 second hashrate seen
    pub highest: f64,
    /// Time since the reporter was created
    pub uptime: Duration,
}

/// Statistics related to hardware performance
#[derive(Debug, Clone)]
pub struct HardwareStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory currently used by the system (in bytes)
    pub memory_used: u64,
    /// Current CPU temperature in Celsius
    pub temperature: f32,
}

/// Collects and reports engine and hardware statistics
pub struct StatsReporter {
    /// Atomic counters for results
    stats: Arc<ResultCounters>,
    /// Source of hashrate figures
    scheduler: Arc<Scheduler>,
    /// System information collector
    system: System,
    /// Hardware component information collector
    components: Components,
    /// Interval at which stats are reported
    report_interval: Duration,
}

/// Atomic result counters shared with the reporting thread
struct ResultCounters {
    results: AtomicU64,
    best_diff: AtomicU64,
    start_time: Instant,
}

impl Clone for StatsReporter {
    fn clone(&self) -> Self {
        StatsReporter {
            stats: self.stats.clone(),
            scheduler: self.scheduler.clone(),
            system: System::new(),
            components: Components::new_with_refreshed_list(),
            report_interval: self.report_interval,
        }
    }
}

impl StatsReporter {
    /// Creates a new StatsReporter with the specified reporting interval
    ///
    /// # Arguments
    /// * `scheduler` - Scheduler whose backends are reported
    /// * `report_interval` - How often to log statistics
    pub fn new(scheduler: Arc<Scheduler>, report_interval: Duration) -> Self {
        StatsReporter {
            stats: Arc::new(ResultCounters {
                results: AtomicU64::new(0),
                best_diff: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
            scheduler,
            system: System::new(),
            components: Components::new_with_refreshed_list(),
            report_interval,
        }
    }

    /// Counts a result emitted by a lane
    pub fn record_result(&self, result: &JobResult) {
        self.stats.results.fetch_add(1, Ordering::Relaxed);
        self.stats.best_diff.fetch_max(result.actual_diff(), Ordering::Relaxed);
    }

    /// Gets the current engine statistics
    ///
    /// # Returns
    /// A snapshot of the current engine statistics
    pub fn get_stats(&self) -> MiningStats {
        let [hashrate_10s, hashrate_1m, hashrate_15m] = self.scheduler.hashrate();

        MiningStats {
            hashes_total: self.scheduler.total_hashes(),
            results: self.stats.results.load(Ordering::Relaxed),
            best_diff: self.stats.best_diff.load(Ordering::Relaxed),
            hashrate_10s,
            hashrate_1m,
            hashrate_15m,
            highest: self.scheduler.highest(),
            uptime: self.stats.start_time.elapsed(),
        }
    }

    /// Gets the current hardware statistics
    ///
    /// This refreshes system information before returning the stats.
    ///
    /// # Returns
    /// A snapshot of the current hardware statistics
    pub fn get_hardware_stats(&mut self) -> HardwareStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.components.refresh(true);

        let cpus = self.system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let temperature = self
            .components
            .iter()
            .find(|c| c.label().contains("CPU") || c.label().contains("Package"))
            .and_then(|c| c.temperature())
            .unwrap_or(0.0);

        HardwareStats {
            cpu_usage,
            memory_used: self.system.used_memory(),
            temperature,
        }
    }

    /// Starts the periodic reporting of statistics
    ///
    /// This spawns a background thread that logs stats at the configured
    /// interval until the scheduler is stopped.
    pub fn start_reporting(&self) -> JoinHandle<()> {
        let mut reporter = self.clone();

        std::thread::spawn(move || {
            let coordinator = reporter.scheduler.coordinator().clone();
            let mut last_report = Instant::now();

            while !coordinator.is_shutdown() {
                std::thread::sleep(SHUTDOWN_POLL.min(reporter.report_interval));
                if last_report.elapsed() < reporter.report_interval {
                    continue;
                }
                last_report = Instant::now();

                reporter.scheduler.print_hashrate(false);
                let mining_stats = reporter.get_stats();
                let hw_stats = reporter.get_hardware_stats();

                log::info!(
                    "Results: {} best diff {} | CPU: {:.1}% | Mem: {} MB | Temp: {:.1}°C",
                    mining_stats.results,
                    mining_stats.best_diff,
                    hw_stats.cpu_usage,
                    hw_stats.memory_used / (1024 * 1024),
                    hw_stats.temperature
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::job::Job;
    use crate::miner::nonce::NonceCoordinator;
    use crate::types::AlgorithmType;

    #[test]
    fn results_are_counted_with_best_difficulty() {
        let scheduler = Arc::new(Scheduler::new(Arc::new(NonceCoordinator::new()), Vec::new()));
        let reporter = StatsReporter::new(scheduler, Duration::from_secs(60));
        let job = Job::from_hex(0, "a", AlgorithmType::CnV0, &"00".repeat(76), "0100", false).unwrap();

        let mut digest = [0u8; 32];
        digest[31] = 0x10;
        reporter.record_result(&JobResult::new(&job, 1, digest));
        digest[31] = 0x01;
        reporter.record_result(&JobResult::new(&job, 2, digest));

        let stats = reporter.get_stats();
        assert_eq!(stats.results, 2);
        assert_eq!(stats.best_diff, u64::MAX / 0x0100_0000_0000_0000);
        assert_eq!(stats.hashes_total, 0);
        assert_eq!(stats.hashrate_10s, 0.0);
    }

    #[test]
    fn reporting_thread_exits_on_shutdown() {
        let scheduler = Arc::new(Scheduler::new(Arc::new(NonceCoordinator::new()), Vec::new()));
        let reporter = StatsReporter::new(scheduler.clone(), Duration::from_millis(10));
        let handle = reporter.start_reporting();
        std::thread::sleep(Duration::from_millis(50));
        scheduler.stop();
        handle.join().unwrap();
    }
}
