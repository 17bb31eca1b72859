//! Glue between the workers and the ledger.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tzmempool_core::{
    BlockAccumulator, BlockOperations, BlockWindow, Interest, MempoolOperation, MessageType,
    WindowEntry, WindowListener,
};

use crate::chain_sync::BlockSink;
use crate::dedup::DedupCache;
use crate::error::Result;
use crate::events::ChainEvent;
use crate::indexer::BlockRef;
use crate::ledger::{self, OperationLedger};

/// Writes catch-up output to the ledger.
pub struct LedgerSink {
    network: String,
    ledger: OperationLedger,
    interest: Arc<Interest>,
}

impl LedgerSink {
    pub fn new(network: impl Into<String>, ledger: OperationLedger, interest: Arc<Interest>) -> Self {
        Self {
            network: network.into(),
            ledger,
            interest,
        }
    }
}

#[async_trait]
impl BlockSink for LedgerSink {
    async fn apply_block(&mut self, block: BlockOperations) -> Result<()> {
        let touched =
            ledger::blocking(|| self.ledger.confirm_block(&self.network, &block, &self.interest))?;
        debug!(
            "[{}] Block {} at level {}: {} operations, {} rows",
            self.network,
            block.block,
            block.level,
            block.len(),
            touched
        );
        Ok(())
    }

    async fn advance(&mut self, level: u64) -> Result<()> {
        ledger::blocking(|| self.ledger.set_state_level(&self.network, level))
    }
}

/// Window callbacks applied to the ledger.
pub struct LedgerWindow<'a> {
    pub network: &'a str,
    pub ledger: &'a OperationLedger,
}

impl WindowListener for LedgerWindow<'_> {
    type Error = crate::error::SyncError;

    fn on_pop(&mut self, entry: &WindowEntry) -> Result<()> {
        let expired = self.ledger.expire(self.network, &entry.branch)?;
        if expired > 0 {
            info!(
                "[{}] Expired {} operations on branch {} (level {})",
                self.network, expired, entry.branch, entry.level
            );
        }
        Ok(())
    }

    fn on_rollback(&mut self, entry: &WindowEntry, level: u64) -> Result<()> {
        let changed = self.ledger.rollback(self.network, &entry.branch, level)?;
        warn!(
            "[{}] Rolled back block {} at level {} to level {} ({} rows)",
            self.network, entry.branch, entry.level, level, changed
        );
        Ok(())
    }
}

/// Persists mempool observations.
pub struct MempoolConsumer {
    network: String,
    ledger: OperationLedger,
    interest: Arc<Interest>,
    dedup: Arc<DedupCache>,
    /// Blocks after the observed level an operation may still be included
    expiration_blocks: u64,
}

impl MempoolConsumer {
    pub fn new(
        network: impl Into<String>,
        ledger: OperationLedger,
        interest: Arc<Interest>,
        dedup: Arc<DedupCache>,
        expiration_blocks: u64,
    ) -> Self {
        Self {
            network: network.into(),
            ledger,
            interest,
            dedup,
            expiration_blocks,
        }
    }

    /// Store one observation unless its hash was recently stored.
    ///
    /// Returns the number of rows inserted.
    pub fn handle(&self, operation: &MempoolOperation) -> Result<usize> {
        if self.dedup.has(&operation.hash) {
            return Ok(0);
        }
        let inserted = self.ledger.insert_mempool(
            &self.network,
            operation,
            &self.interest,
            Some(operation.level + self.expiration_blocks),
        )?;
        self.dedup.set(&operation.hash);
        if inserted > 0 {
            debug!(
                "[{}] {} {} at level {}",
                self.network, operation.status, operation.hash, operation.level
            );
        }
        Ok(inserted)
    }

    /// Consume the queue until cancelled, then drain what is already queued.
    pub async fn run(self, mut rx: mpsc::Receiver<MempoolOperation>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                operation = rx.recv() => {
                    let Some(operation) = operation else { break };
                    ledger::blocking(|| self.handle_logged(&operation));
                }
            }
        }

        rx.close();
        while let Some(operation) = rx.recv().await {
            ledger::blocking(|| self.handle_logged(&operation));
        }
        info!("[{}] Mempool consumer stopped", self.network);
    }

    fn handle_logged(&self, operation: &MempoolOperation) {
        if let Err(e) = self.handle(operation) {
            warn!("[{}] Cannot store {}: {}", self.network, operation.hash, e);
        }
    }
}

/// A window step that failed and must be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingCallback {
    Pop(WindowEntry),
    Rollback(WindowEntry, u64),
    /// Roll the window back to the level again once the failed entry is done
    Reorg(u64),
}

/// Applies indexer events to the block window and the ledger.
pub struct ChainEventHandler {
    network: String,
    ledger: OperationLedger,
    interest: Arc<Interest>,
    window: BlockWindow,
    retries: VecDeque<PendingCallback>,
}

impl ChainEventHandler {
    pub fn new(
        network: impl Into<String>,
        ledger: OperationLedger,
        interest: Arc<Interest>,
        window: BlockWindow,
    ) -> Self {
        Self {
            network: network.into(),
            ledger,
            interest,
            window,
            retries: VecDeque::new(),
        }
    }

    /// The block window.
    pub fn window(&self) -> &BlockWindow {
        &self.window
    }

    /// Number of window steps waiting for a retry.
    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// Replay failed window steps, oldest first.
    pub fn retry_pending(&mut self) -> Result<()> {
        while let Some(callback) = self.retries.pop_front() {
            let mut listener = LedgerWindow {
                network: &self.network,
                ledger: &self.ledger,
            };
            let outcome = match &callback {
                PendingCallback::Pop(entry) => listener.on_pop(entry),
                PendingCallback::Rollback(entry, level) => listener.on_rollback(entry, *level),
                &PendingCallback::Reorg(level) => {
                    let reorg = WindowEntry::new("", level, MessageType::Reorg);
                    match self.window.add(reorg, &mut listener) {
                        Ok(()) => self.lower_state_level(level),
                        Err(failed) => {
                            // Keep the reorg queued behind the entry that failed again.
                            self.retries.push_front(PendingCallback::Reorg(level));
                            self.retries
                                .push_front(PendingCallback::Rollback(failed.entry, level));
                            return Err(failed.source);
                        }
                    }
                }
            };
            if let Err(e) = outcome {
                self.retries.push_front(callback);
                return Err(e);
            }
        }
        Ok(())
    }

    fn add_to_window(&mut self, entry: WindowEntry) -> Result<()> {
        let mut listener = LedgerWindow {
            network: &self.network,
            ledger: &self.ledger,
        };
        match self.window.add(entry, &mut listener) {
            Ok(()) => Ok(()),
            Err(failed) => {
                match failed.rollback_level {
                    // The rest of the rollback is replayed after the failed entry.
                    Some(level) => {
                        self.retries
                            .push_back(PendingCallback::Rollback(failed.entry, level));
                        self.retries.push_back(PendingCallback::Reorg(level));
                    }
                    None => self.retries.push_back(PendingCallback::Pop(failed.entry)),
                }
                Err(failed.source)
            }
        }
    }

    fn lower_state_level(&self, level: u64) -> Result<()> {
        if self.ledger.state_level(&self.network)?.is_some_and(|stored| stored > level) {
            self.ledger.set_state_level(&self.network, level)?;
        }
        Ok(())
    }

    /// Add known blocks, oldest first, e.g. to fill the window after a restart.
    pub fn backfill(&mut self, mut blocks: Vec<BlockRef>) -> Result<usize> {
        blocks.sort_by_key(|b| b.level);
        let last = self.window.last_level();
        let mut added = 0;
        for block in blocks {
            if last.is_some_and(|last| block.level <= last) {
                continue;
            }
            self.add_to_window(WindowEntry::new(block.hash, block.level, MessageType::Data))?;
            added += 1;
        }
        Ok(added)
    }

    fn reorg(&mut self, level: u64) -> Result<()> {
        self.add_to_window(WindowEntry::new("", level, MessageType::Reorg))?;
        // The window may not hold the invalidated blocks, e.g. right after a restart.
        self.lower_state_level(level)
    }

    /// Apply one event.
    pub fn handle(&mut self, event: ChainEvent) -> Result<()> {
        self.retry_pending()?;

        match event {
            ChainEvent::Blocks(message) => match message.message_type {
                MessageType::State => debug!("[{}] Blocks state at level {}", self.network, message.state),
                MessageType::Reorg => self.reorg(message.state)?,
                MessageType::Data => {
                    let mut blocks = message.data;
                    blocks.sort_by_key(|b| b.level);
                    for block in blocks {
                        // Already added by a backfill racing the subscription.
                        if self.window.iter().any(|e| e.branch == block.hash) {
                            continue;
                        }
                        self.add_to_window(WindowEntry::new(block.hash, block.level, MessageType::Data))?;
                    }
                }
            },
            ChainEvent::Operations(message) => match message.message_type {
                MessageType::State => {}
                MessageType::Reorg => self.reorg(message.state)?,
                MessageType::Data => {
                    let mut operations = message.data;
                    operations.sort_by_key(|op| (op.level, op.id));

                    let mut accumulator = BlockAccumulator::new();
                    let mut blocks = Vec::new();
                    for operation in operations {
                        blocks.extend(accumulator.push(operation));
                    }
                    blocks.extend(accumulator.flush());

                    for block in blocks {
                        self.ledger.confirm_block(&self.network, &block, &self.interest)?;
                        debug!(
                            "[{}] Confirmed {} operations at level {}",
                            self.network,
                            block.len(),
                            block.level
                        );
                    }
                }
            },
        }
        Ok(())
    }
}
