use anyhow::Result;
use clap::Parser;

use cli_interface::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli_interface::run(Cli::parse()).await
}
