//! Command-line interface module.
//!
//! This module handles:
//! - Argument parsing via clap
//! - Output formatting (summary lines, layer trees)

mod args;
mod output;

pub use args::Args;
pub use output::{format_timestamp, format_value, OutputFormatter, OutputMode};
