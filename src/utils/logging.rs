// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! Sets up `env_logger` for the miner with the crate's line format. Worker
//! threads log through the `log` facade only; nothing here is hot-path.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Initializes the logging subsystem
///
/// `RUST_LOG` wins when set; otherwise `level` (from the config file) is used.
pub fn init_logging(level: LevelFilter) {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        builder.filter_level(level);
    }

    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}

/// Configures benchmark-specific logging
///
/// Defaults to Debug so per-thread speed lines are visible.
pub fn init_bench_logging() {
    init_logging(LevelFilter::Debug);
}

/// Creates a base logger builder with the `[ts level module:line] msg` format
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_millis();
            let level = record.level();
            let module = record.module_path().unwrap_or_default();
            let line = record.line().unwrap_or(0);

            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                ts,
                level,
                module,
                line,
                record.args()
            )
        })
        .target(Target::Stdout);

    builder
}
