//! trialnet CLI entry point.

use clap::Parser;

use trialnet::cli::{Cli, Commands};
use trialnet::infrastructure::config::ConfigLoader;
use trialnet::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Commands reload and report config errors themselves
    let logging = ConfigLoader::load().map(|c| c.logging).unwrap_or_default();
    let _logger = match LoggerImpl::init(&LogConfig::from(&logging)) {
        Ok(logger) => logger,
        Err(err) => trialnet::cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Simulate(args) => trialnet::cli::commands::simulate::execute(args, cli.json).await,
        Commands::Config(command) => trialnet::cli::commands::config::execute(command, cli.json).await,
        Commands::Assets(command) => trialnet::cli::commands::assets::execute(command, cli.json).await,
    };

    if let Err(err) = result {
        trialnet::cli::handle_error(err, cli.json);
    }
}
