//! CLI Adapter
//!
//! Command-line interface for yield-sentinel.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    execute, BreakerCmd, CliApp, Command, OptimizeCmd, RebalanceCmd, RunCmd, ScoreCmd, UserArgs,
    ValidateCmd,
};
