//! kwresearch CLI: concurrent multi-keyword web research.
//!
//! Searches, fetches and analyzes every keyword in parallel, then prints an
//! aggregated summary of what was found.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
