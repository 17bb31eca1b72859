//! In-memory indexer and node used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use tzmempool_core::{
    ConfirmedOperation, MempoolOperation, OperationContent, OperationKind, OperationStatus,
    OperationsPage,
};
use tzmempool_sync::error::{Result, SyncError};
use tzmempool_sync::{BlockRef, Constants, Delegate, IndexerApi, LevelRange, NodeApi, NodeHead, NodeHeader};

pub const NETWORK: &str = "testnet";

pub fn confirmed(id: u64, hash: &str, level: u64, kind: OperationKind) -> ConfirmedOperation {
    ConfirmedOperation {
        id,
        hash: hash.to_string(),
        level,
        block: format!("BLock{level}"),
        kind,
        sender: Some("tz1sender".to_string()),
        target: None,
    }
}

pub fn pending(hash: &str, branch: &str, status: OperationStatus, kind: OperationKind) -> MempoolOperation {
    let fields = json!({"kind": kind.tag(), "source": "tz1sender", "level": 0});
    MempoolOperation {
        hash: hash.to_string(),
        branch: branch.to_string(),
        status,
        signature: Some("sigFake".to_string()),
        contents: vec![OperationContent {
            kind,
            fields: fields.as_object().cloned().unwrap_or_default(),
        }],
        errors: None,
        level: 0,
    }
}

#[derive(Default)]
pub struct FakeIndexer {
    pub head: AtomicU64,
    pub operations: Mutex<Vec<ConfirmedOperation>>,
    pub blocks: Mutex<Vec<BlockRef>>,
    pub rights: Mutex<HashMap<u64, Vec<String>>>,
    pub delegates: Mutex<Vec<Delegate>>,
    pub fail_operations: Mutex<bool>,
    pub operation_calls: AtomicUsize,
    pub rights_calls: AtomicUsize,
    pub delegate_calls: AtomicUsize,
}

impl FakeIndexer {
    pub fn with_operations(head: u64, operations: Vec<ConfirmedOperation>) -> Self {
        let indexer = Self::default();
        indexer.head.store(head, Ordering::SeqCst);
        *indexer.operations.lock().unwrap() = operations;
        indexer
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexerApi for FakeIndexer {
    async fn operations(
        &self,
        kind: OperationKind,
        range: LevelRange,
        cursor: Option<u64>,
        limit: usize,
    ) -> Result<OperationsPage> {
        self.operation_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_operations.lock().unwrap() {
            return Err(SyncError::Transport {
                url: "fake".into(),
                reason: "unreachable".into(),
            });
        }

        let mut matching: Vec<_> = self
            .operations
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.kind == kind)
            .filter(|op| op.level > range.after && op.level <= range.up_to)
            .filter(|op| cursor.map_or(true, |c| op.id > c))
            .cloned()
            .collect();
        matching.sort_by_key(|op| op.id);
        matching.truncate(limit);

        Ok(OperationsPage {
            fetched: matching.len(),
            last_id: matching.last().map(|op| op.id),
            operations: matching,
        })
    }

    async fn head(&self) -> Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn blocks(&self, range: LevelRange, limit: usize) -> Result<Vec<BlockRef>> {
        let mut blocks: Vec<_> = self
            .blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.level > range.after && b.level <= range.up_to)
            .cloned()
            .collect();
        blocks.sort_by(|a, b| b.level.cmp(&a.level));
        blocks.truncate(limit);
        Ok(blocks)
    }

    async fn consensus_rights(&self, level: u64) -> Result<Vec<String>> {
        self.rights_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rights.lock().unwrap().get(&level).cloned().unwrap_or_default())
    }

    async fn delegates(&self) -> Result<Vec<Delegate>> {
        self.delegate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.delegates.lock().unwrap().clone())
    }
}

pub struct FakeNode {
    pub url: String,
    pub level: AtomicU64,
    pub pending: Mutex<Vec<MempoolOperation>>,
}

impl FakeNode {
    pub fn new(level: u64, pending: Vec<MempoolOperation>) -> Self {
        Self {
            url: "http://fake-node".to_string(),
            level: AtomicU64::new(level),
            pending: Mutex::new(pending),
        }
    }
}

#[async_trait]
impl NodeApi for FakeNode {
    fn url(&self) -> &str {
        &self.url
    }

    async fn header(&self) -> Result<NodeHeader> {
        Ok(NodeHeader {
            level: self.level.load(Ordering::SeqCst),
            protocol: "PtFake".to_string(),
        })
    }

    async fn pending_operations(&self) -> Result<Vec<MempoolOperation>> {
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn constants(&self) -> Result<Constants> {
        Ok(Constants {
            time_between_blocks: vec![15],
            blocks_per_cycle: 8,
        })
    }

    async fn head(&self) -> Result<NodeHead> {
        Ok(NodeHead {
            chain_id: "NetXdQprcVkpaWU".to_string(),
            hash: "BLhead".to_string(),
            level: self.level.load(Ordering::SeqCst),
        })
    }
}
