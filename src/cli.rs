//! CLI argument parsing for the report aggregator

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Output format for the aggregation summary
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "fiber-profiler")]
#[command(version)]
#[command(about = "Aggregate stall reports emitted by the fiber profiler", long_about = None)]
pub struct Cli {
    /// Report files to aggregate; reads stdin when none are given
    pub files: Vec<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Only report the N methods with the highest total time
    #[arg(long = "top", value_name = "N")]
    pub top: Option<usize>,
}
