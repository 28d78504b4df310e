//! Ragline CLI: ask a question, get a sourced answer streamed to the terminal.
//!
//! Rephrases the query for web search, distils the best fragment from each
//! result page, streams a grounded answer and suggests follow-up questions.

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
