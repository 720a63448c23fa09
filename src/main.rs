mod catalog;
mod cli;
mod config;
mod download;
mod eea;
mod era5;
mod error;
mod merge;
mod parquet;
mod region;
mod spss;
mod stats;
mod table;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use cli::{command, Cli, Commands};
use config::Config;

const DEFAULT_LOGGING_LEVEL: &str = "info";

async fn run(cli: &Cli) -> Result<Vec<PathBuf>> {
    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Era5Download {} => command::era5_download(&config).await,
        Commands::Era5Prepare {} => command::era5_prepare(&config).await,
        Commands::EeaDownload {} => command::eea_download(&config).await,
        Commands::EeaPrepare {} => command::eea_prepare(&config).await,
        Commands::Merge {} => command::merge(&config).await,
    }
}

#[tokio::main]
async fn main() {
    // Set RUST_LOG to `DEFAULT_LOGGING_LEVEL` if not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", DEFAULT_LOGGING_LEVEL);
    }
    pretty_env_logger::init_timed();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(files) => {
            for file in files {
                println!("File saved to `{}`", file.display());
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
