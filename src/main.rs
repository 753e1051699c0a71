// src/main.rs
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use nonce_engine::miner::job::MIN_BLOB_SIZE;
use nonce_engine::stats::hashrate;
use nonce_engine::utils::logging::init_bench_logging;
use nonce_engine::*;
use serde::Deserialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;

/// Poll interval of the result printer
const RESULT_POLL: Duration = Duration::from_millis(500);

/// One line of the job feed
#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "lowercase")]
enum FeedCommand {
    /// New job from the pool layer
    Job(JobNotification),
    /// Stop hashing, keep the job
    Pause,
    /// Continue hashing the current job
    Resume,
    /// Pool connection lost, publish the pause job
    Disconnect,
}

/// Main entry point for the nonce engine
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start(opts),
        cli::Action::Benchmark(opts) => run_benchmark(opts),
        cli::Action::Config(opts) => generate_config(opts),
        cli::Action::Plan(opts) => print_plan(opts),
    }
}

/// Runs the engine against a job feed until ctrl-c
///
/// # Operations
/// 1. Loads the configuration and applies CLI overrides
/// 2. Builds every backend through the scheduler
/// 3. Starts result printing and speed reporting
/// 4. Feeds jobs and pause commands to the scheduler, ticking once a second
fn start(opts: cli::StartOptions) -> Result<(), MinerError> {
    let mut config = config::load(&opts.config)?;
    // Apply CLI overrides
    if let Some(threads) = opts.threads {
        config.cpu.max_threads = threads;
    }
    if let Some(algorithm) = opts.algorithm {
        config.algorithm = algorithm;
    }
    config.validate()?;
    init_logging(config.level_filter()?);

    let (result_sender, result_receiver) = unbounded();
    let scheduler = Arc::new(Scheduler::from_config(
        &config,
        AlgorithmRegistry::with_defaults(),
        result_sender,
    )?);

    let reporter = StatsReporter::new(scheduler.clone(), Duration::from_secs(config.print_time.max(1)));
    let reporting = (config.print_time > 0).then(|| reporter.start_reporting());
    let printer = spawn_result_printer(result_receiver, scheduler.clone(), reporter);

    let rt = Runtime::new()?;
    let outcome: Result<(), MinerError> = rt.block_on(async {
        match &opts.jobs {
            Some(path) => {
                let file = tokio::fs::File::open(path).await?;
                feed_loop(BufReader::new(file), &scheduler, config.algorithm).await
            }
            None => feed_loop(BufReader::new(tokio::io::stdin()), &scheduler, config.algorithm).await,
        }
    });

    log::info!("shutting down");
    scheduler.stop();
    scheduler.print_hashrate(true);
    for handle in [Some(printer), reporting].into_iter().flatten() {
        if handle.join().is_err() {
            log::error!("helper thread panicked");
        }
    }
    outcome
}

/// Reads feed lines, ticks the scheduler and waits for ctrl-c
///
/// The feed ending does not stop the engine; the last job keeps running.
async fn feed_loop<R>(reader: R, scheduler: &Scheduler, default_algorithm: AlgorithmType) -> Result<(), MinerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut feed_open = true;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line(), if feed_open => match line? {
                Some(line) => handle_line(&line, scheduler, default_algorithm),
                None => {
                    log::info!("job feed closed");
                    feed_open = false;
                }
            },
            _ = ticker.tick() => scheduler.tick(),
            signal = &mut ctrl_c => {
                signal?;
                return Ok(());
            }
        }
    }
}

/// Applies one feed line; malformed lines are logged and skipped
fn handle_line(line: &str, scheduler: &Scheduler, default_algorithm: AlgorithmType) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let command = match serde_json::from_str::<FeedCommand>(line) {
        Ok(command) => command,
        Err(e) => {
            log::warn!("ignoring feed line: {}", e);
            return;
        }
    };

    match command {
        FeedCommand::Job(notification) => {
            let dispatched = notification
                .into_job(default_algorithm)
                .and_then(|job| scheduler.set_job(job));
            if let Err(e) = dispatched {
                log::warn!("{}", e);
            }
        }
        FeedCommand::Pause => scheduler.set_enabled(false),
        FeedCommand::Resume => scheduler.set_enabled(true),
        FeedCommand::Disconnect => scheduler.pause(),
    }
}

/// Prints every result as a submit line until the scheduler is stopped
fn spawn_result_printer(
    results: Receiver<JobResult>,
    scheduler: Arc<Scheduler>,
    reporter: StatsReporter,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            match results.recv_timeout(RESULT_POLL) {
                Ok(result) => {
                    reporter.record_result(&result);
                    log::info!(
                        "result job '{}' nonce {:08x} diff {} ({})",
                        result.job_id,
                        result.nonce,
                        result.actual_diff(),
                        result.difficulty
                    );
                    println!("{}", result.to_submit_json());
                }
                Err(RecvTimeoutError::Timeout) if !scheduler.coordinator().is_shutdown() => {}
                Err(_) => break,
            }
        }
    })
}

/// Runs a fixed job on the CPU backend
///
/// # Arguments
/// * `opts` - Benchmark configuration options
///
/// # Operations
/// 1. Initializes benchmark-specific logging
/// 2. Builds a CPU-only scheduler
/// 3. Hashes a zero blob for the requested duration
/// 4. Reports total hashes, average and highest rate
fn run_benchmark(opts: cli::BenchmarkOptions) -> Result<(), MinerError> {
    init_bench_logging();

    let mut config = Config {
        algorithm: opts.algorithm,
        ..Config::default()
    };
    config.cpu.max_threads = opts.threads.unwrap_or(0);
    config.cpu.intensity = opts.intensity;
    config.validate()?;

    let registry = AlgorithmRegistry::with_defaults();
    if !registry.supports(opts.algorithm) {
        return Err(MinerError::AlgorithmError(format!("no CPU implementation of {}", opts.algorithm)));
    }

    let (result_sender, result_receiver) = unbounded();
    let scheduler = Scheduler::from_config(&config, registry, result_sender)?;
    let job = Job::from_hex(0, "benchmark", opts.algorithm, &"00".repeat(MIN_BLOB_SIZE), "0100", false)?;

    log::info!("Starting {} benchmark for {} seconds", opts.algorithm, opts.duration);
    let start_time = Instant::now();
    scheduler.set_job(job)?;

    let mut results = 0u64;
    while start_time.elapsed().as_secs() < opts.duration {
        std::thread::sleep(Duration::from_secs(1));
        results += result_receiver.try_iter().count() as u64;
        scheduler.tick();
    }

    let elapsed = start_time.elapsed().as_secs_f64();
    let total = scheduler.total_hashes();
    scheduler.print_hashrate(true);
    scheduler.stop();

    // Report final results
    log::info!("Benchmark results:");
    log::info!("Total hashes: {}", total);
    log::info!("Results found: {}", results);
    log::info!("Average hashrate: {} H/s", hashrate::format(total as f64 / elapsed));
    log::info!("Highest hashrate: {} H/s", hashrate::format(scheduler.highest()));
    log::logger().flush();

    Ok(())
}

/// Generates configuration template file
///
/// # Arguments
/// * `opts` - Configuration generation options
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    let config = config::generate_template(opts.cuda, opts.opencl);
    std::fs::write(&opts.output, config)?;
    println!("configuration written to {}", opts.output.display());
    Ok(())
}

/// Prints the CPU lane plan for an algorithm
///
/// # Arguments
/// * `opts` - Algorithm, optional topology file and fill policy
fn print_plan(opts: cli::PlanOptions) -> Result<(), MinerError> {
    let topology = topology::provider::detect(opts.topology.as_deref())?;
    let lanes = topology::plan(opts.algorithm, &topology, opts.fill);

    println!(
        "{} threads {} cores {} L2 {} KB L3 {} KB",
        if topology.brand.is_empty() { "unknown CPU" } else { &topology.brand },
        topology.threads,
        topology.cores,
        topology.l2() / 1024,
        topology.l3() / 1024
    );
    println!(
        "{} ({} KB scratchpad): {} threads {} lanes",
        opts.algorithm,
        opts.algorithm.memory() / 1024,
        lanes.len(),
        lanes.iter().map(|lane| lane.intensity).sum::<usize>()
    );
    for (index, lane) in lanes.iter().enumerate() {
        match lane.affinity {
            Some(cpu) => println!("#{:<3} intensity {} affinity {}", index, lane.intensity, cpu),
            None => println!("#{:<3} intensity {} affinity none", index, lane.intensity),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_commands_parse() {
        let job = r#"{"method":"job","params":{"job_id":"1","blob":"00","target":"0100"}}"#;
        assert!(matches!(serde_json::from_str::<FeedCommand>(job).unwrap(), FeedCommand::Job(_)));
        assert!(matches!(
            serde_json::from_str::<FeedCommand>(r#"{"method":"pause"}"#).unwrap(),
            FeedCommand::Pause
        ));
        assert!(serde_json::from_str::<FeedCommand>(r#"{"method":"submit"}"#).is_err());
    }
}
