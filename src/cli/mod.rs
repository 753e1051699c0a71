// src/cli/mod.rs
//! Command-line interface definitions
//!
//! Subcommands are parsed with `clap` derive; `main` dispatches on [`Action`].

/// Subcommand and option structs
pub mod commands;

pub use commands::*;
