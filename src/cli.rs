//! Command-line interface for the intake worker.
//!
//! There is deliberately no subcommand surface: the binary is a single
//! foreground run loop.

use std::path::PathBuf;

use clap::Parser;

/// Transactional queue-drain worker
#[derive(Parser, Debug)]
#[command(name = "intake", version, about)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
