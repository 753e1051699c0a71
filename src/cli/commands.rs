// src/cli/commands.rs
use crate::topology::CoreFill;
use crate::types::AlgorithmType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Nonce engine CLI - multi-backend proof-of-work hashing
#[derive(Parser, Debug)]
#[command(name = "nonce-engine")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform (start hashing, run benchmarks, generate config or print a lane plan)
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the engine
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Hash jobs read from a line-delimited JSON feed
    Start(StartOptions),

    /// Run a fixed job on the CPU backend and report the rate
    Benchmark(BenchmarkOptions),

    /// Generate configuration file template
    Config(ConfigOptions),

    /// Print the CPU lane plan for an algorithm
    Plan(PlanOptions),
}

/// Options for starting the engine
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Maximum number of CPU threads (overrides config)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Algorithm for jobs that do not name one (overrides config)
    #[arg(short, long)]
    pub algorithm: Option<AlgorithmType>,

    /// Job feed file; stdin when omitted
    #[arg(short, long)]
    pub jobs: Option<PathBuf>,
}

/// Options for running benchmarks
#[derive(Parser, Debug)]
pub struct BenchmarkOptions {
    /// Algorithm to benchmark
    #[arg(short, long, default_value = "cn/0")]
    pub algorithm: AlgorithmType,

    /// Duration of benchmark in seconds
    #[arg(short, long, default_value_t = 60)]
    pub duration: u64,

    /// Maximum number of threads (default: planner's choice)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Lanes per thread, 1..=5 (default: planner's choice)
    #[arg(short, long)]
    pub intensity: Option<usize>,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,

    /// Enable the CUDA section with an example device
    #[arg(long)]
    pub cuda: bool,

    /// Enable the OpenCL section with an example device
    #[arg(long)]
    pub opencl: bool,
}

/// Options for printing a lane plan
#[derive(Parser, Debug)]
pub struct PlanOptions {
    /// Algorithm whose scratchpad size drives the plan
    #[arg(short, long, default_value = "cn/1")]
    pub algorithm: AlgorithmType,

    /// TOML topology description; detected when omitted
    #[arg(short, long)]
    pub topology: Option<PathBuf>,

    /// How hardware threads of a core are filled
    #[arg(short, long, value_enum, default_value_t = CoreFill::Pack)]
    pub fill: CoreFill,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_defaults() {
        let cli = Commands::try_parse_from(["nonce-engine", "start"]).unwrap();
        match cli.action {
            Action::Start(opts) => {
                assert_eq!(opts.config, PathBuf::from("config.toml"));
                assert!(opts.threads.is_none());
                assert!(opts.jobs.is_none());
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn plan_parses_algorithm_and_fill() {
        let cli =
            Commands::try_parse_from(["nonce-engine", "plan", "--algorithm", "cn-lite/1", "--fill", "spread"]).unwrap();
        match cli.action {
            Action::Plan(opts) => {
                assert_eq!(opts.algorithm, AlgorithmType::CnLiteV1);
                assert_eq!(opts.fill, CoreFill::Spread);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn benchmark_rejects_unknown_algorithm() {
        assert!(Commands::try_parse_from(["nonce-engine", "benchmark", "-a", "rx/0"]).is_err());
    }
}
