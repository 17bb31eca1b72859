//! tzmempool CLI
//!
//! Tracks Tezos mempool operations until they are included, refused or expired.

mod commands;
mod config;
mod logging;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tzmempool")]
#[command(version)]
#[command(about = "tzmempool - Tezos mempool and operation lifecycle tracker", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track every configured network until Ctrl-C
    Run(commands::run::RunArgs),

    /// Validate a configuration file and print a summary
    CheckConfig(commands::check_config::CheckConfigArgs),

    /// List supported operation kinds
    Kinds,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::CheckConfig(args) => commands::check_config::run(args),
        Commands::Kinds => commands::kinds::run(),
    };

    std::process::exit(exit_code);
}
