//! CLI entry point: parse flags, assemble settings, run the pipeline.

use clap::Parser;

use crate::config::{Cli, Settings};
use crate::orchestrator;

/// Check if verbose mode is enabled, for early logging setup before `Cli`
/// has been parsed.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Parse CLI flags, resolve settings, and run the pipeline to completion.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli)?;

    let code = orchestrator::run(settings).await;
    std::process::exit(code);
}
