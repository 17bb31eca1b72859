//! Run command implementation.

use std::path::PathBuf;

use clap::Args;
use eyre::{bail, Result};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tzmempool_sync::Orchestrator;

use crate::config::{Config, DEFAULT_PATH};
use crate::logging::{self, LogFormat};
use crate::output;

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Configuration file
    #[arg(short, long, env = "TZMEMPOOL_CONFIG", default_value = DEFAULT_PATH)]
    pub config: PathBuf,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Run the run command.
pub async fn run(args: RunArgs) -> i32 {
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            output::error(&format!("{e:#}"));
            return 1;
        }
    };
    if let Err(e) = logging::init(args.log_format) {
        output::error(&format!("{e:#}"));
        return 1;
    }

    match track(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            1
        }
    }
}

async fn track(config: Config) -> Result<()> {
    let ledger = config.open_ledger()?;
    let orchestrators = config
        .network_settings()?
        .into_iter()
        .map(|settings| Orchestrator::new(settings, ledger.clone()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    info!(
        "Tracking {} network(s), database {}",
        orchestrators.len(),
        config.database.path
    );

    let cancel = CancellationToken::new();
    let shutdown = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested, stopping workers");
                    cancel.cancel();
                }
                Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
            }
        })
    };

    let outcomes = join_all(
        orchestrators
            .into_iter()
            .map(|orchestrator| tokio::spawn(orchestrator.run(cancel.clone()))),
    )
    .await;
    shutdown.abort();

    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Network stopped: {}", e);
                failed += 1;
            }
            Err(e) => {
                error!("Network task terminated abnormally: {}", e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} network(s) stopped with errors");
    }
    info!("All networks stopped");
    Ok(())
}
