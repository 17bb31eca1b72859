//! Catch-up of confirmed operations.
//!
//! Walks from the stored confirmed level to the indexer head, paginating
//! every tracked kind independently and merging the pages so that blocks
//! are emitted exactly once, in ascending level order.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use tracing::{debug, info};
use tzmempool_core::{BlockAccumulator, BlockOperations, MergeQueue, OperationKind};

use crate::error::{Result, SyncError};
use crate::indexer::{IndexerApi, LevelRange};

/// Default page size for operation queries.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Receiver of catch-up output.
#[async_trait]
pub trait BlockSink: Send {
    /// Apply the operations of one confirmed block.
    async fn apply_block(&mut self, block: BlockOperations) -> Result<()>;

    /// Everything up to `level` has been applied.
    async fn advance(&mut self, level: u64) -> Result<()>;
}

/// Merges paginated per-kind operation lists into ordered blocks.
pub struct ChainSyncEngine {
    indexer: Arc<dyn IndexerApi>,
    kinds: Vec<OperationKind>,
    page_size: usize,
}

impl ChainSyncEngine {
    /// Create an engine over `kinds`.
    ///
    /// # Errors
    ///
    /// Returns `Config` when `kinds` is empty or `page_size` is zero.
    pub fn new(indexer: Arc<dyn IndexerApi>, kinds: Vec<OperationKind>, page_size: usize) -> Result<Self> {
        if kinds.is_empty() {
            return Err(SyncError::Config("no operation kinds to synchronize".into()));
        }
        if page_size == 0 {
            return Err(SyncError::Config("page size must be positive".into()));
        }
        Ok(Self {
            indexer,
            kinds,
            page_size,
        })
    }

    /// Replay every operation in `range`, block by block.
    ///
    /// Returns the number of blocks emitted.
    pub async fn sync_range(&self, range: LevelRange, sink: &mut dyn BlockSink) -> Result<usize> {
        let mut queue = MergeQueue::new(&self.kinds, self.page_size)?;
        let mut accumulator = BlockAccumulator::new();
        let mut emitted = 0;

        loop {
            let fetches = queue.pending_fetches();
            let pages = try_join_all(fetches.iter().map(|&(kind, cursor)| async move {
                let page = self
                    .indexer
                    .operations(kind, range, cursor, self.page_size)
                    .await?;
                Ok::<_, SyncError>((kind, page))
            }))
            .await?;

            for (kind, page) in pages {
                debug!(
                    "Fetched {} {} operations in ({}, {}]",
                    page.fetched, kind, range.after, range.up_to
                );
                queue.push_page(kind, page);
            }

            while let Some(operation) = queue.pop_lowest() {
                if let Some(block) = accumulator.push(operation) {
                    sink.apply_block(block).await?;
                    emitted += 1;
                }
            }

            if queue.is_drained() {
                break;
            }
        }

        if let Some(block) = accumulator.flush() {
            sink.apply_block(block).await?;
            emitted += 1;
        }
        Ok(emitted)
    }

    /// Catch up from `from` to the indexer head, repeating until the head
    /// stops moving. Returns the level reached.
    ///
    /// On error nothing past the last [`BlockSink::advance`] is assumed
    /// applied; calling again from the stored level is safe.
    pub async fn catch_up(&self, from: u64, sink: &mut dyn BlockSink) -> Result<u64> {
        let mut level = from;
        loop {
            let head = self.indexer.head().await?;
            if head <= level {
                return Ok(level);
            }

            let range = LevelRange {
                after: level,
                up_to: head,
            };
            let blocks = self.sync_range(range, sink).await?;
            sink.advance(head).await?;
            info!("Caught up levels {}..={} ({} blocks with operations)", level + 1, head, blocks);
            level = head;
        }
    }
}
