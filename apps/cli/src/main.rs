//! extractflow CLI: resumable AI-driven content extraction.
//!
//! Analyzes a batch of HTML documents, generates an extraction schema and
//! extractor, validates it against the batch and optionally renders the
//! results as Markdown. Every stage checkpoints under the output root, so an
//! interrupted run picks up where it stopped.

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
