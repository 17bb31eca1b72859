//! Baker public keys, refreshed once per cycle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::error::Result;
use crate::indexer::IndexerApi;

/// Address to public key map, replaced wholesale on refresh.
///
/// Readers get an `Arc` snapshot, so a concurrent refresh is observed
/// either entirely or not at all.
#[derive(Debug)]
pub struct DelegateCache {
    blocks_per_cycle: u64,
    keys: RwLock<Arc<HashMap<String, String>>>,
    refreshed_cycle: RwLock<Option<u64>>,
}

impl DelegateCache {
    /// Create an empty cache for a network with the given cycle length.
    pub fn new(blocks_per_cycle: u64) -> Self {
        Self {
            blocks_per_cycle,
            keys: RwLock::new(Arc::new(HashMap::new())),
            refreshed_cycle: RwLock::new(None),
        }
    }

    fn cycle(&self, level: u64) -> u64 {
        level.checked_div(self.blocks_per_cycle).unwrap_or(0)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<HashMap<String, String>> {
        match self.keys.read() {
            Ok(keys) => Arc::clone(&keys),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Public key of `address`, if cached.
    pub fn public_key(&self, address: &str) -> Option<String> {
        self.snapshot().get(address).cloned()
    }

    /// Whether `level` starts a cycle the cache was not refreshed for.
    pub fn needs_refresh(&self, level: u64) -> bool {
        let refreshed = *self.refreshed_cycle.read().unwrap_or_else(|e| e.into_inner());
        match refreshed {
            None => true,
            Some(cycle) => self.cycle(level) > cycle,
        }
    }

    /// Replace the mapping with the indexer's delegate list.
    pub async fn refresh(&self, indexer: &dyn IndexerApi, level: u64) -> Result<usize> {
        let delegates = indexer.delegates().await?;
        let keys: HashMap<String, String> = delegates
            .into_iter()
            .map(|d| (d.address, d.public_key))
            .collect();
        let count = keys.len();

        *self.keys.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(keys);
        *self.refreshed_cycle.write().unwrap_or_else(|e| e.into_inner()) = Some(self.cycle(level));

        info!("Delegate cache refreshed at level {} ({} keys)", level, count);
        Ok(count)
    }

    /// Refresh if `level` is in a cycle newer than the cached one.
    pub async fn ensure_fresh(&self, indexer: &dyn IndexerApi, level: u64) -> Result<()> {
        if self.needs_refresh(level) {
            self.refresh(indexer, level).await?;
        }
        Ok(())
    }
}
