//! Check-config command implementation.

use std::path::PathBuf;

use clap::Args;

use crate::config::{Config, DEFAULT_PATH};
use crate::output;

/// Arguments for the check-config command.
#[derive(Args)]
pub struct CheckConfigArgs {
    /// Configuration file
    #[arg(short, long, env = "TZMEMPOOL_CONFIG", default_value = DEFAULT_PATH)]
    pub config: PathBuf,
}

/// Run the check-config command.
pub fn run(args: CheckConfigArgs) -> i32 {
    let loaded = Config::load(&args.config).and_then(|config| {
        let networks = config.network_settings()?;
        Ok((config, networks))
    });
    let (config, networks) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            output::error(&format!("{e:#}"));
            return 1;
        }
    };

    output::header("Configuration");
    output::kv("File", &args.config.display().to_string());
    output::kv(
        "Database",
        &format!("{} ({})", config.database.kind, config.database.path),
    );
    output::kv(
        "Block window",
        &format!("{} blocks", config.settings.expired_after_blocks),
    );
    output::kv("Page size", &config.settings.page_size.to_string());

    for network in &networks {
        output::header(&format!("Network {}", network.name));
        output::kv("Indexer", &network.indexer_url);
        output::kv("Events", &network.events_url);
        output::kv("Nodes", &network.nodes.join(", "));
        let kinds: Vec<&str> = network.kinds.iter().map(|k| k.tag()).collect();
        output::kv("Kinds", &kinds.join(", "));
        let accounts = if network.accounts.is_empty() {
            "all".to_string()
        } else {
            network.accounts.len().to_string()
        };
        output::kv("Accounts", &accounts);
    }

    println!();
    output::success("Configuration is valid");
    0
}
