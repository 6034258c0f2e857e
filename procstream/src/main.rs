//! procstream - run a command and read its output as decoded text streams.
//!
//! Architecture:
//! - The library's `stream` module does the decoding; `process` spawns
//! - This binary is a thin CLI over both
//! - Logging goes to stderr and is configured with `RUST_LOG`

mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    execute(cli).await
}
