//! Keystash CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::{CliConfig, LogFormat};

#[derive(Parser)]
#[command(name = "keystash")]
#[command(author, version, about = "Build cache restore and save for CI jobs", long_about = None)]
struct Cli {
    /// Config file, instead of the per-user default
    #[arg(long, global = true, env = "KEYSTASH_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format, overriding the config file
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref());

    let log_format = cli
        .log_format
        .or_else(|| config.as_ref().ok().map(|c| c.log_format))
        .unwrap_or_default();
    init_tracing(log_format);

    let config = config?;

    match cli.command {
        Commands::Restore(args) => {
            handlers::restore(&config, args).await?;
        }
        Commands::Save(args) => {
            handlers::save(&config, args).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
        },
    }

    Ok(())
}
