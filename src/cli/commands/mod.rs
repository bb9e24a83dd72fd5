//! CLI command implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scanforge")]
#[command(about = "Resumable-upload document OCR pipeline")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup, before clap parses).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Dispatch API server
    Serve {
        /// Address to bind to, e.g. 127.0.0.1:3030 (overrides config file and
        /// BIND_ADDRESS environment variable)
        #[arg(long)]
        bind: Option<String>,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => serve::cmd_serve(bind).await,
    }
}
