//! Command-line interface for negot-sim.
//!
//! Provides the `simulate`, `resume` and `insights` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
