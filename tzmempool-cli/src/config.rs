//! Configuration file.
//!
//! ```toml
//! [database]
//! kind = "sqlite"
//! path = "tzmempool.db"
//!
//! [settings]
//! expired_after_blocks = 60
//!
//! [[networks]]
//! name = "mainnet"
//! indexer_url = "https://api.tzkt.io"
//! nodes = ["${TEZOS_NODE}"]
//! kinds = ["transaction", "endorsement"]
//! ```
//!
//! `${VAR}` references in string values are replaced from the environment
//! before the file is interpreted.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use eyre::{bail, eyre, Result, WrapErr};
use regex::Regex;
use serde::Deserialize;
use toml::Value;
use tzmempool_core::OperationKind;
use tzmempool_sync::chain_sync::DEFAULT_PAGE_SIZE;
use tzmempool_sync::{NetworkSettings, OperationLedger, MAX_ACCOUNTS};

/// Configuration file looked up when `--config` is not given.
pub const DEFAULT_PATH: &str = "tzmempool.toml";

const MAX_PAGE_SIZE: usize = 10_000;

/// Whole configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

/// `[database]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub kind: String,
    /// File path, or `:memory:`
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: "sqlite".to_string(),
            path: "tzmempool.db".to_string(),
        }
    }
}

/// `[settings]` table, shared by every network.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub keep_operations_seconds: u64,
    pub keep_in_chain_seconds: u64,
    /// Block window capacity
    pub expired_after_blocks: usize,
    pub mempool_refresh_interval_seconds: u64,
    pub rpc_timeout_seconds: u64,
    pub baker_resolve_interval_seconds: u64,
    pub retention_interval_seconds: u64,
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keep_operations_seconds: 172_800,
            keep_in_chain_seconds: 604_800,
            expired_after_blocks: 60,
            mempool_refresh_interval_seconds: 1,
            rpc_timeout_seconds: 10,
            baker_resolve_interval_seconds: 10,
            retention_interval_seconds: 600,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One `[[networks]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub name: String,
    pub indexer_url: String,
    /// Defaults to `{indexer_url}/v1/ws`
    pub events_url: Option<String>,
    pub nodes: Vec<String>,
    pub kinds: Vec<String>,
    #[serde(default)]
    pub accounts: Vec<String>,
}

impl Config {
    /// Read, substitute, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read {}", path.display()))?;
        Self::parse(&text).wrap_err_with(|| format!("invalid configuration {}", path.display()))
    }

    /// Parse and validate configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        let table: toml::Table = text.parse()?;
        let mut value = Value::Table(table);

        let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
        substitute_env(&mut value, &pattern)?;

        let config: Config = value.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that would stop the tracker from starting.
    pub fn validate(&self) -> Result<()> {
        if self.database.kind != "sqlite" {
            bail!("unsupported database kind '{}', only 'sqlite' is available", self.database.kind);
        }
        if self.database.path.is_empty() {
            bail!("database path is empty");
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.settings.page_size) {
            bail!("page_size must be between 1 and {MAX_PAGE_SIZE}");
        }
        if self.settings.expired_after_blocks == 0 {
            bail!("expired_after_blocks must be positive");
        }
        if self.networks.is_empty() {
            bail!("no network configured");
        }
        self.network_settings().map(|_| ())
    }

    /// Per-network settings handed to the orchestrators.
    pub fn network_settings(&self) -> Result<Vec<NetworkSettings>> {
        let mut names = HashSet::new();
        let mut all = Vec::with_capacity(self.networks.len());

        for network in &self.networks {
            if network.name.is_empty() {
                bail!("network without a name");
            }
            if !names.insert(network.name.as_str()) {
                bail!("network '{}' is configured twice", network.name);
            }
            if network.accounts.len() > MAX_ACCOUNTS {
                bail!(
                    "network '{}': {} accounts configured, at most {MAX_ACCOUNTS} allowed",
                    network.name,
                    network.accounts.len()
                );
            }

            let mut kinds = Vec::new();
            for tag in &network.kinds {
                let kind = parse_kind(tag).map_err(|e| eyre!("network '{}': {e}", network.name))?;
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }

            let indexer_url = network.indexer_url.trim_end_matches('/').to_string();
            let events_url = network
                .events_url
                .clone()
                .unwrap_or_else(|| format!("{indexer_url}/v1/ws"));

            let settings = NetworkSettings {
                name: network.name.clone(),
                indexer_url,
                events_url,
                nodes: network.nodes.clone(),
                kinds,
                accounts: network.accounts.clone(),
                window_capacity: self.settings.expired_after_blocks,
                page_size: self.settings.page_size,
                mempool_interval: Duration::from_secs(self.settings.mempool_refresh_interval_seconds),
                rpc_timeout: Duration::from_secs(self.settings.rpc_timeout_seconds),
                baker_interval: Duration::from_secs(self.settings.baker_resolve_interval_seconds),
                retention_interval: Duration::from_secs(self.settings.retention_interval_seconds),
                keep_operations: Duration::from_secs(self.settings.keep_operations_seconds),
                keep_in_chain: Duration::from_secs(self.settings.keep_in_chain_seconds),
            };
            settings.validate()?;
            all.push(settings);
        }
        Ok(all)
    }

    /// Open the configured database.
    pub fn open_ledger(&self) -> Result<OperationLedger> {
        let ledger = if self.database.path == ":memory:" {
            OperationLedger::open_in_memory()
        } else {
            OperationLedger::open(&self.database.path)
        };
        ledger.wrap_err_with(|| format!("cannot open database {}", self.database.path))
    }
}

/// Node tags, indexer type names and protocol aliases are all accepted.
fn parse_kind(tag: &str) -> Result<OperationKind> {
    match tag.parse::<OperationKind>() {
        Ok(kind) => Ok(kind),
        Err(e) => OperationKind::from_indexer_type(tag).ok_or_else(|| eyre!(e)),
    }
}

fn substitute_env(value: &mut Value, pattern: &Regex) -> Result<()> {
    match value {
        Value::String(text) => {
            let mut missing = None;
            let replaced = pattern
                .replace_all(text.as_str(), |caps: &regex::Captures<'_>| {
                    std::env::var(&caps[1]).unwrap_or_else(|_| {
                        missing.get_or_insert_with(|| caps[1].to_string());
                        String::new()
                    })
                })
                .into_owned();
            if let Some(var) = missing {
                bail!("environment variable '{var}' is not set");
            }
            *text = replaced;
        }
        Value::Array(items) => {
            for item in items {
                substitute_env(item, pattern)?;
            }
        }
        Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_env(item, pattern)?;
            }
        }
        _ => {}
    }
    Ok(())
}
