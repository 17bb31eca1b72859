//! Per-network lifecycle.
//!
//! ```text
//!   node constants + chain id ──▶ catch-up ──▶ steady state
//!                                               ├─ mempool pollers (one per node) ─▶ consumer
//!                                               ├─ confirmed level refresher
//!                                               ├─ event stream ─▶ block window / ledger
//!                                               ├─ baker resolver
//!                                               └─ retention sweep
//! ```
//!
//! Every worker watches the same `CancellationToken`; [`Orchestrator::run`]
//! returns once all of them have stopped.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tzmempool_core::{BlockWindow, Interest, MessageType, OperationKind};

use crate::baker::BakerResolver;
use crate::chain_sync::ChainSyncEngine;
use crate::dedup::DedupCache;
use crate::delegates::DelegateCache;
use crate::error::{Result, SyncError};
use crate::events::{ChainEvent, EventStream};
use crate::handlers::{ChainEventHandler, LedgerSink, MempoolConsumer};
use crate::indexer::{IndexerApi, LevelRange, TzktClient};
use crate::ledger::{self, OperationLedger};
use crate::mempool::{self, MempoolReceiver};
use crate::node::{Constants, NodeApi, NodeRpcClient};

/// Most accounts a network may filter on.
pub const MAX_ACCOUNTS: usize = 100;

/// Delay before retrying a failed startup step or reconnecting the stream.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Shortest read timeout on the event stream; the hub pings every 15s.
const MIN_STREAM_IDLE: Duration = Duration::from_secs(30);

/// Everything needed to track one network.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub name: String,
    pub indexer_url: String,
    pub events_url: String,
    pub nodes: Vec<String>,
    pub kinds: Vec<OperationKind>,
    pub accounts: Vec<String>,
    /// Block window capacity, i.e. blocks before an unconfirmed operation expires
    pub window_capacity: usize,
    pub page_size: usize,
    pub mempool_interval: Duration,
    pub rpc_timeout: Duration,
    pub baker_interval: Duration,
    pub retention_interval: Duration,
    pub keep_operations: Duration,
    pub keep_in_chain: Duration,
}

impl NetworkSettings {
    /// Check the settings that would make the network unusable.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SyncError::Config(format!("network '{}': {msg}", self.name)));
        if self.kinds.is_empty() {
            return fail("no operation kinds configured".into());
        }
        if self.nodes.is_empty() {
            return fail("no node endpoints configured".into());
        }
        if self.accounts.len() > MAX_ACCOUNTS {
            return fail(format!("{} accounts configured, at most {MAX_ACCOUNTS} allowed", self.accounts.len()));
        }
        if self.window_capacity == 0 {
            return fail("block window capacity must be positive".into());
        }
        if self.page_size == 0 {
            return fail("page size must be positive".into());
        }
        Ok(())
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Runs every worker of one network.
pub struct Orchestrator {
    settings: NetworkSettings,
    ledger: OperationLedger,
    indexer: Arc<dyn IndexerApi>,
    nodes: Vec<Arc<dyn NodeApi>>,
    interest: Arc<Interest>,
}

impl Orchestrator {
    /// Build an orchestrator talking to the configured endpoints.
    pub fn new(settings: NetworkSettings, ledger: OperationLedger) -> Result<Self> {
        let indexer: Arc<dyn IndexerApi> =
            Arc::new(TzktClient::new(&settings.indexer_url, settings.rpc_timeout)?);
        let nodes = settings
            .nodes
            .iter()
            .map(|url| {
                NodeRpcClient::new(url, settings.rpc_timeout).map(|n| Arc::new(n) as Arc<dyn NodeApi>)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::with_clients(settings, ledger, indexer, nodes)
    }

    /// Build an orchestrator over the given clients.
    pub fn with_clients(
        settings: NetworkSettings,
        ledger: OperationLedger,
        indexer: Arc<dyn IndexerApi>,
        nodes: Vec<Arc<dyn NodeApi>>,
    ) -> Result<Self> {
        settings.validate()?;
        if nodes.is_empty() {
            return Err(SyncError::Config(format!("network '{}': no node clients", settings.name)));
        }
        let interest = Arc::new(Interest::new(
            settings.kinds.iter().copied(),
            settings.accounts.iter().cloned(),
        ));
        Ok(Self {
            settings,
            ledger,
            indexer,
            nodes,
            interest,
        })
    }

    /// Constants and chain id from the first node that answers.
    async fn network_info(&self) -> Result<(Constants, String)> {
        let mut last_error = None;
        for node in &self.nodes {
            let info = async { Ok::<_, SyncError>((node.constants().await?, node.head().await?.chain_id)) };
            match info.await {
                Ok(info) => return Ok(info),
                Err(e) => {
                    warn!("[{}] Node {} unavailable: {}", self.settings.name, node.url(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SyncError::Config("no node clients".into())))
    }

    /// Stored confirmed level, or the indexer head on first start.
    async fn start_level(&self) -> Result<u64> {
        if let Some(level) = ledger::blocking(|| self.ledger.state_level(&self.settings.name))? {
            return Ok(level);
        }
        let head = self.indexer.head().await?;
        ledger::blocking(|| self.ledger.set_state_level(&self.settings.name, head))?;
        info!("[{}] First start, tracking from head level {}", self.settings.name, head);
        Ok(head)
    }

    /// Run until `cancel` fires and every worker has stopped.
    ///
    /// Only configuration errors are returned; everything else is logged
    /// and retried.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let name = self.settings.name.clone();
        let window = BlockWindow::new(self.settings.window_capacity)?;
        let engine = Arc::new(ChainSyncEngine::new(
            Arc::clone(&self.indexer),
            self.interest.kinds(),
            self.settings.page_size,
        )?);
        info!("[{}] Starting ({} kinds, {} nodes)", name, self.interest.kinds().len(), self.nodes.len());

        let (constants, chain_id) = loop {
            match self.network_info().await {
                Ok(info) => break info,
                Err(e) => warn!("[{}] Cannot read network constants: {}", name, e),
            }
            if !pause(&cancel, RETRY_DELAY).await {
                return Ok(());
            }
        };

        let mut sink = LedgerSink::new(name.clone(), self.ledger.clone(), Arc::clone(&self.interest));
        let level = loop {
            let caught_up = async {
                let start = self.start_level().await?;
                engine.catch_up(start, &mut sink).await
            };
            match caught_up.await {
                Ok(level) => break level,
                Err(e) => warn!("[{}] Catch-up failed: {}", name, e),
            }
            if !pause(&cancel, RETRY_DELAY).await {
                return Ok(());
            }
        };
        info!("[{}] Caught up to level {}", name, level);

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        // Mempool.
        let dedup_ttl = constants.block_time() * self.settings.window_capacity as u32;
        let dedup = Arc::new(DedupCache::new(dedup_ttl));
        let (tx, rx) = mempool::channel();
        let receiver = MempoolReceiver::new(name.clone(), self.nodes.clone(), self.settings.mempool_interval);
        receiver.set_confirmed_level(level);
        let confirmed = receiver.confirmed_level();
        handles.extend(receiver.spawn(tx, cancel.clone()));

        let consumer = MempoolConsumer::new(
            name.clone(),
            self.ledger.clone(),
            Arc::clone(&self.interest),
            Arc::clone(&dedup),
            self.settings.window_capacity as u64,
        );
        handles.push(tokio::spawn(consumer.run(rx, cancel.clone())));

        // Confirmed level refresher.
        {
            let ledger = self.ledger.clone();
            let cancel = cancel.clone();
            let name = name.clone();
            let interval = self.settings.mempool_interval;
            handles.push(tokio::spawn(async move {
                loop {
                    match ledger::blocking(|| ledger.state_level(&name)) {
                        Ok(Some(level)) => confirmed.store(level, Ordering::Relaxed),
                        Ok(None) => {}
                        Err(e) => warn!("[{}] Cannot read confirmed level: {}", name, e),
                    }
                    if !pause(&cancel, interval).await {
                        break;
                    }
                }
            }));
        }

        // Baker resolver.
        if self.interest.tracks(OperationKind::Endorsement) {
            let delegates = Arc::new(DelegateCache::new(constants.blocks_per_cycle));
            let mut resolver = BakerResolver::new(
                name.clone(),
                chain_id,
                Arc::clone(&self.indexer),
                self.ledger.clone(),
                delegates,
            );
            let cancel = cancel.clone();
            let name = name.clone();
            let interval = self.settings.baker_interval;
            handles.push(tokio::spawn(async move {
                loop {
                    if let Err(e) = resolver.resolve_pending().await {
                        warn!("[{}] Baker resolution failed: {}", name, e);
                    }
                    if !pause(&cancel, interval).await {
                        break;
                    }
                }
            }));
        }

        // Retention.
        {
            let ledger = self.ledger.clone();
            let cancel = cancel.clone();
            let name = name.clone();
            let (interval, keep_operations, keep_in_chain) = (
                self.settings.retention_interval,
                self.settings.keep_operations,
                self.settings.keep_in_chain,
            );
            handles.push(tokio::spawn(async move {
                loop {
                    match ledger::blocking(|| ledger.sweep(&name, keep_operations, keep_in_chain)) {
                        Ok(stats) if stats.in_chain + stats.other > 0 => info!(
                            "[{}] Retention removed {} in-chain and {} other operations",
                            name, stats.in_chain, stats.other
                        ),
                        Ok(_) => {}
                        Err(e) => warn!("[{}] Retention sweep failed: {}", name, e),
                    }
                    dedup.purge_expired();
                    if !pause(&cancel, interval).await {
                        break;
                    }
                }
            }));
        }

        // Chain events.
        let worker = EventWorker {
            name: name.clone(),
            events_url: self.settings.events_url.clone(),
            kinds: self.interest.kinds(),
            idle_timeout: self.settings.rpc_timeout.max(MIN_STREAM_IDLE),
            capacity: self.settings.window_capacity,
            indexer: Arc::clone(&self.indexer),
            engine,
            sink,
            handler: ChainEventHandler::new(name.clone(), self.ledger.clone(), Arc::clone(&self.interest), window),
            ledger: self.ledger.clone(),
        };
        handles.push(tokio::spawn(worker.run(cancel.clone())));

        info!("[{}] Running {} workers", name, handles.len());
        for outcome in join_all(handles).await {
            if let Err(e) = outcome {
                error!("[{}] Worker terminated abnormally: {}", name, e);
            }
        }
        info!("[{}] Stopped", name);
        Ok(())
    }
}

/// Owns the event subscription and the block window.
struct EventWorker {
    name: String,
    events_url: String,
    kinds: Vec<OperationKind>,
    idle_timeout: Duration,
    capacity: usize,
    indexer: Arc<dyn IndexerApi>,
    engine: Arc<ChainSyncEngine>,
    sink: LedgerSink,
    handler: ChainEventHandler,
    ledger: OperationLedger,
}

impl EventWorker {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            match self.session(&cancel).await {
                Ok(()) if cancel.is_cancelled() => break,
                Ok(()) => warn!("[{}] Event stream closed by the server", self.name),
                Err(e) => warn!("[{}] Event stream failed: {}", self.name, e),
            }
            if !pause(&cancel, RETRY_DELAY).await {
                break;
            }
        }
        info!("[{}] Event worker stopped", self.name);
    }

    /// Subscribe, fill the gap since the last session, then follow the stream.
    async fn session(&mut self, cancel: &CancellationToken) -> Result<()> {
        ledger::blocking(|| self.handler.retry_pending())?;
        let mut stream = EventStream::connect(&self.events_url, &self.kinds, self.idle_timeout).await?;

        // Events that arrive meanwhile stay buffered in the socket.
        let stored = ledger::blocking(|| self.ledger.state_level(&self.name))?.unwrap_or_default();
        let head = self.engine.catch_up(stored, &mut self.sink).await?;
        let after = self.handler.window().last_level().unwrap_or_default();
        let blocks = self
            .indexer
            .blocks(LevelRange { after, up_to: head }, self.capacity)
            .await?;
        let added = ledger::blocking(|| self.handler.backfill(blocks))?;
        info!("[{}] Following {} from level {} ({} blocks backfilled)", self.name, stream.url(), head, added);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    stream.close().await;
                    return Ok(());
                }
                event = stream.next_event() => {
                    let Some(event) = event? else {
                        return Ok(());
                    };
                    if let ChainEvent::Blocks(message) = &event {
                        if message.message_type == MessageType::Reorg {
                            warn!("[{}] Reorg to level {}", self.name, message.state);
                        }
                    }
                    ledger::blocking(|| self.handler.handle(event))?;
                }
            }
        }
    }
}
