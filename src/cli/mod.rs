//! CLI module for the Vaulter sync tool.
//!
//! This module provides the command-line interface over the sync core.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, Target};
pub use output::OutputFormatter;
