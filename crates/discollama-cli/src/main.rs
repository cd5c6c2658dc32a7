mod bootstrap_helpers;
mod cli_args;
mod cli_types;
mod runtime_config;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::runtime_config::{run_discollama, DiscollamaConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = DiscollamaConfig::from_cli(cli)?;
    run_discollama(config).await
}
