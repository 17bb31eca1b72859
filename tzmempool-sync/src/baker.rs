//! Endorsement baker resolution.
//!
//! An endorsement does not name its signer. The resolver rebuilds the
//! signed bytes, hashes them under the chain watermark, and tries the public
//! key of every baker holding endorsing rights until one verifies.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, info, warn};
use tzmempool_core::{forge, signature};

use crate::delegates::DelegateCache;
use crate::error::Result;
use crate::indexer::IndexerApi;
use crate::ledger::{self, OperationLedger, PendingEndorsement};

/// Endorsements examined per pass.
pub const DEFAULT_BATCH: usize = 1000;

/// Chain ids whose watermark is kept.
const WATERMARK_CACHE_SIZE: usize = 8;

/// Outcome of one resolver pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Endorsements that got a baker
    pub resolved: usize,
    /// Endorsements left for a later pass
    pub skipped: usize,
    /// Signature checks performed
    pub verifications: usize,
}

/// Assigns bakers to endorsements of one network.
pub struct BakerResolver {
    network: String,
    chain_id: String,
    indexer: Arc<dyn IndexerApi>,
    ledger: OperationLedger,
    delegates: Arc<DelegateCache>,
    watermarks: LruCache<String, Vec<u8>>,
    /// Rights of the last level asked for
    rights: Option<(u64, Vec<String>)>,
    batch: usize,
    /// Last row examined, so unresolvable rows do not hold back newer ones
    cursor: Option<(u64, String)>,
}

impl BakerResolver {
    /// Create a resolver for `network`, whose chain id is `chain_id`.
    pub fn new(
        network: impl Into<String>,
        chain_id: impl Into<String>,
        indexer: Arc<dyn IndexerApi>,
        ledger: OperationLedger,
        delegates: Arc<DelegateCache>,
    ) -> Self {
        Self {
            network: network.into(),
            chain_id: chain_id.into(),
            indexer,
            ledger,
            delegates,
            watermarks: LruCache::new(
                NonZeroUsize::new(WATERMARK_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            ),
            rights: None,
            batch: DEFAULT_BATCH,
            cursor: None,
        }
    }

    /// Limit the number of endorsements examined per pass.
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    fn watermark(&mut self) -> Result<Vec<u8>> {
        if let Some(watermark) = self.watermarks.get(&self.chain_id) {
            return Ok(watermark.clone());
        }
        let watermark = forge::chain_watermark(&self.chain_id)?;
        self.watermarks.put(self.chain_id.clone(), watermark.clone());
        Ok(watermark)
    }

    async fn rights_for(&mut self, level: u64) -> Result<&[String]> {
        let cached = matches!(&self.rights, Some((cached, _)) if *cached == level);
        if !cached {
            let rights = self.indexer.consensus_rights(level).await?;
            debug!("Fetched {} endorsing rights for level {}", rights.len(), level);
            self.rights = Some((level, rights));
        }
        Ok(self.rights.as_ref().map(|(_, r)| r.as_slice()).unwrap_or_default())
    }

    /// Find the baker of one endorsement.
    ///
    /// `Ok(None)` means no cached key matched; the endorsement is retried
    /// on a later pass.
    async fn resolve_one(
        &mut self,
        endorsement: &PendingEndorsement,
        stats: &mut ResolveStats,
    ) -> Result<Option<String>> {
        self.delegates
            .ensure_fresh(self.indexer.as_ref(), endorsement.level)
            .await?;

        let bytes = forge::endorsement_bytes(&endorsement.branch, endorsement.level)?;
        let digest = forge::signing_digest(&self.watermark()?, &bytes);

        let keys = self.delegates.snapshot();
        let rights = self.rights_for(endorsement.level + 1).await?;
        for address in rights {
            let Some(public_key) = keys.get(address) else {
                continue;
            };
            stats.verifications += 1;
            if signature::verify(public_key, &endorsement.signature, &digest) {
                return Ok(Some(address.clone()));
            }
        }
        Ok(None)
    }

    /// Run one pass over the next batch of endorsements without a baker.
    ///
    /// Passes page through the pending rows and start over from the lowest
    /// level after the last page. A failure on one endorsement is logged and
    /// does not stop the pass; only failing to list the endorsements is an error.
    pub async fn resolve_pending(&mut self) -> Result<ResolveStats> {
        let after = self.cursor.as_ref().map(|(level, hash)| (*level, hash.as_str()));
        let pending = ledger::blocking(|| {
            self.ledger
                .endorsements_without_baker(&self.network, after, self.batch)
        })?;
        self.cursor = if pending.len() < self.batch {
            None
        } else {
            pending.last().map(|e| (e.stored_level, e.hash.clone()))
        };
        let mut stats = ResolveStats::default();

        for endorsement in &pending {
            match self.resolve_one(endorsement, &mut stats).await {
                Ok(Some(baker)) => {
                    let assigned = ledger::blocking(|| {
                        self.ledger.set_baker(&self.network, &endorsement.hash, &baker)
                    })?;
                    if assigned {
                        stats.resolved += 1;
                        debug!(
                            "[{}] Endorsement {} at level {} signed by {}",
                            self.network, endorsement.hash, endorsement.level, baker
                        );
                    }
                }
                Ok(None) => stats.skipped += 1,
                Err(e) => {
                    stats.skipped += 1;
                    warn!(
                        "[{}] Cannot resolve baker of {} at level {}: {}",
                        self.network, endorsement.hash, endorsement.level, e
                    );
                }
            }
        }

        if stats.resolved > 0 {
            info!(
                "[{}] Resolved {} endorsement bakers ({} pending)",
                self.network, stats.resolved, stats.skipped
            );
        }
        Ok(stats)
    }
}
