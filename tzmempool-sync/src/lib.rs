//! # tzmempool sync
//!
//! Networked half of the mempool tracker: clients for the indexer and the
//! nodes, the catch-up engine, mempool pollers, the baker resolver, the
//! SQLite operation ledger, and the per-network [`Orchestrator`] wiring them
//! together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use tzmempool_core::OperationKind;
//! use tzmempool_sync::{NetworkSettings, OperationLedger, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = NetworkSettings {
//!         name: "mainnet".into(),
//!         indexer_url: "https://api.tzkt.io".into(),
//!         events_url: "https://api.tzkt.io/v1/ws".into(),
//!         nodes: vec!["https://rpc.tzbeta.net".into()],
//!         kinds: vec![OperationKind::Transaction, OperationKind::Endorsement],
//!         accounts: Vec::new(),
//!         window_capacity: 60,
//!         page_size: 1000,
//!         mempool_interval: Duration::from_secs(1),
//!         rpc_timeout: Duration::from_secs(10),
//!         baker_interval: Duration::from_secs(10),
//!         retention_interval: Duration::from_secs(600),
//!         keep_operations: Duration::from_secs(2 * 86_400),
//!         keep_in_chain: Duration::from_secs(7 * 86_400),
//!     };
//!
//!     let ledger = OperationLedger::open("tzmempool.db")?;
//!     let cancel = CancellationToken::new();
//!     Orchestrator::new(settings, ledger)?.run(cancel).await?;
//!     Ok(())
//! }
//! ```

pub mod baker;
pub mod chain_sync;
pub mod decode;
pub mod dedup;
pub mod delegates;
pub mod error;
pub mod events;
pub mod handlers;
pub mod http;
pub mod indexer;
pub mod ledger;
pub mod mempool;
pub mod node;
pub mod orchestrator;

// Re-export main types for convenience
pub use baker::{BakerResolver, ResolveStats};
pub use chain_sync::{BlockSink, ChainSyncEngine};
pub use dedup::DedupCache;
pub use delegates::DelegateCache;
pub use error::SyncError;
pub use events::{ChainEvent, EventStream, StreamMessage};
pub use handlers::{ChainEventHandler, LedgerSink, LedgerWindow, MempoolConsumer};
pub use indexer::{BlockRef, Delegate, IndexerApi, LevelRange, TzktClient};
pub use ledger::{OperationLedger, PendingEndorsement, StoredOperation, SweepStats};
pub use mempool::MempoolReceiver;
pub use node::{Constants, NodeApi, NodeHead, NodeHeader, NodeRpcClient};
pub use orchestrator::{NetworkSettings, Orchestrator, MAX_ACCOUNTS};
