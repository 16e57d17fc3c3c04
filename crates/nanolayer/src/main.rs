use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging from core crate
    nanolayer_core::logging::init()?;

    let parsed = cli::Cli::parse();
    parsed.dispatch().await
}
