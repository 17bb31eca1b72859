//! Tezos node RPC client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use tzmempool_core::{MempoolOperation, OperationContent, OperationKind, OperationStatus};

use crate::decode::Fields;
use crate::error::{Result, SyncError};
use crate::http::HttpClient;

/// Current head header, as far as the mempool poller cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    pub level: u64,
    pub protocol: String,
}

/// Head identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHead {
    pub chain_id: String,
    pub hash: String,
    pub level: u64,
}

/// Protocol constants used by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constants {
    /// Seconds between blocks, per priority/round
    pub time_between_blocks: Vec<u64>,
    pub blocks_per_cycle: u64,
}

impl Constants {
    /// Nominal block time.
    pub fn block_time(&self) -> Duration {
        Duration::from_secs(self.time_between_blocks.first().copied().unwrap_or(30))
    }
}

/// Calls the tracker makes against a node.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Endpoint, for logging.
    fn url(&self) -> &str;

    async fn header(&self) -> Result<NodeHeader>;

    /// Pending operations of every bucket. `level` is left at zero; the
    /// poller stamps it with the header level.
    async fn pending_operations(&self) -> Result<Vec<MempoolOperation>>;

    async fn constants(&self) -> Result<Constants>;

    async fn head(&self) -> Result<NodeHead>;
}

/// JSON RPC client for one node.
#[derive(Debug, Clone)]
pub struct NodeRpcClient {
    http: HttpClient,
}

impl NodeRpcClient {
    /// Create a client for the node at `url`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(url, timeout)?,
        })
    }

    /// Wrap an already configured HTTP client.
    pub fn from_http(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NodeApi for NodeRpcClient {
    fn url(&self) -> &str {
        self.http.base_url()
    }

    async fn header(&self) -> Result<NodeHeader> {
        let body = self.http.get_json("/chains/main/blocks/head/header", &[]).await?;
        let header = Fields::of(&body, "header")?;
        Ok(NodeHeader {
            level: header.u64("level")?,
            protocol: header.str("protocol")?.to_string(),
        })
    }

    async fn pending_operations(&self) -> Result<Vec<MempoolOperation>> {
        let body = self
            .http
            .get_json("/chains/main/mempool/pending_operations", &[])
            .await?;
        let (operations, skipped) = decode_pending(&body)?;
        if skipped > 0 {
            warn!("Skipped {} malformed pending operations from {}", skipped, self.url());
        }
        Ok(operations)
    }

    async fn constants(&self) -> Result<Constants> {
        let body = self
            .http
            .get_json("/chains/main/blocks/head/context/constants", &[])
            .await?;
        decode_constants(&body)
    }

    async fn head(&self) -> Result<NodeHead> {
        let body = self.http.get_json("/chains/main/blocks/head/header", &[]).await?;
        let header = Fields::of(&body, "header")?;
        Ok(NodeHead {
            chain_id: header.str("chain_id")?.to_string(),
            hash: header.str("hash")?.to_string(),
            level: header.u64("level")?,
        })
    }
}

/// Decode protocol constants.
///
/// Older protocols expose `time_between_blocks`; newer ones `minimal_block_delay`.
pub fn decode_constants(body: &Value) -> Result<Constants> {
    let constants = Fields::of(body, "constants")?;
    let blocks_per_cycle = constants.u64("blocks_per_cycle")?;

    let time_between_blocks = match constants.get("time_between_blocks") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                    .ok_or(SyncError::WrongType {
                        field: "time_between_blocks",
                        context: "constants",
                        expected: "array of integers",
                    })
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(SyncError::WrongType {
                field: "time_between_blocks",
                context: "constants",
                expected: "array",
            })
        }
        None => vec![constants.u64("minimal_block_delay")?],
    };

    Ok(Constants {
        time_between_blocks,
        blocks_per_cycle,
    })
}

fn bucket_status(name: &str) -> Option<OperationStatus> {
    match name {
        "applied" | "validated" => Some(OperationStatus::Applied),
        "branch_delayed" => Some(OperationStatus::BranchDelayed),
        "branch_refused" => Some(OperationStatus::BranchRefused),
        "refused" => Some(OperationStatus::Refused),
        _ => None,
    }
}

/// Decode a pending-operations snapshot.
///
/// Returns the well-formed operations and the number of skipped items.
/// Entries may be objects carrying a `hash` or `[hash, operation]` pairs.
pub fn decode_pending(body: &Value) -> Result<(Vec<MempoolOperation>, usize)> {
    let snapshot = Fields::of(body, "pending operations")?;
    let mut operations = Vec::new();
    let mut skipped = 0;

    for (bucket, entries) in snapshot.map() {
        let Some(status) = bucket_status(bucket) else {
            continue;
        };
        let Some(entries) = entries.as_array() else {
            skipped += 1;
            continue;
        };
        for entry in entries {
            match decode_pending_entry(entry, status) {
                Ok(Some(op)) => operations.push(op),
                Ok(None) => {}
                Err(e) => {
                    debug!("Malformed {} entry: {}", bucket, e);
                    skipped += 1;
                }
            }
        }
    }

    Ok((operations, skipped))
}

fn decode_pending_entry(entry: &Value, status: OperationStatus) -> Result<Option<MempoolOperation>> {
    let (hash, body) = match entry {
        Value::Array(pair) if pair.len() == 2 => {
            let hash = pair[0].as_str().ok_or(SyncError::WrongType {
                field: "hash",
                context: "pending operation",
                expected: "string",
            })?;
            (hash, Fields::of(&pair[1], "pending operation")?)
        }
        _ => {
            let body = Fields::of(entry, "pending operation")?;
            (body.str("hash")?, body)
        }
    };

    let mut contents = Vec::new();
    for content in body.array("contents")? {
        let content = Fields::of(content, "operation content")?;
        let tag = content.str("kind")?;
        match tag.parse::<OperationKind>() {
            Ok(kind) => contents.push(OperationContent {
                kind,
                fields: content.map().clone(),
            }),
            Err(_) => debug!("Ignoring content of unknown kind '{}' in {}", tag, hash),
        }
    }
    if contents.is_empty() {
        return Ok(None);
    }

    let errors = match status {
        OperationStatus::Applied => None,
        _ => body.get("error").or_else(|| body.get("errors")).cloned(),
    };

    Ok(Some(MempoolOperation {
        hash: hash.to_string(),
        branch: body.str("branch")?.to_string(),
        status,
        signature: body.opt_str("signature")?.map(str::to_string),
        contents,
        errors,
        level: 0,
    }))
}
