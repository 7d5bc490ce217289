//! Command-line interface for quizforge.
//!
//! Provides commands for generating question batches, inspecting saved ones
//! and regenerating their images.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
