//! researchflow CLI: drives research projects through their pipeline with a
//! local model.
//!
//! Each `run` is one tick: select projects, ask the model for the current
//! stage's tasks, and record the stage decision.

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
