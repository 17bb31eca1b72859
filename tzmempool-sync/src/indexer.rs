//! Indexer (TzKT) REST client.
//!
//! Only the request/response contract matters to the engine, so the client
//! sits behind [`IndexerApi`] and tests swap in fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use tzmempool_core::{ConfirmedOperation, OperationKind, OperationsPage};

use crate::decode::Fields;
use crate::error::{Result, SyncError};
use crate::http::HttpClient;

/// Confirmed levels `after < level <= up_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRange {
    pub after: u64,
    pub up_to: u64,
}

/// A block as listed by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub hash: String,
    pub level: u64,
}

/// A baker and its public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegate {
    pub address: String,
    pub public_key: String,
}

/// Calls the engine makes against the indexer.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    /// One page of confirmed operations of `kind` in `range`, ordered by id,
    /// starting after `cursor`.
    async fn operations(
        &self,
        kind: OperationKind,
        range: LevelRange,
        cursor: Option<u64>,
        limit: usize,
    ) -> Result<OperationsPage>;

    /// Current head level.
    async fn head(&self) -> Result<u64>;

    /// Most recent blocks in `range`, highest level first.
    async fn blocks(&self, range: LevelRange, limit: usize) -> Result<Vec<BlockRef>>;

    /// Addresses holding endorsing rights at `level`.
    async fn consensus_rights(&self, level: u64) -> Result<Vec<String>>;

    /// Active delegates with a revealed public key.
    async fn delegates(&self) -> Result<Vec<Delegate>>;
}

/// REST client for a TzKT instance.
#[derive(Debug, Clone)]
pub struct TzktClient {
    http: HttpClient,
}

impl TzktClient {
    /// Create a client for the indexer at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(base_url, timeout)?,
        })
    }

    /// Wrap an already configured HTTP client.
    pub fn from_http(http: HttpClient) -> Self {
        Self { http }
    }

    /// Base URL of the indexer.
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }
}

#[async_trait]
impl IndexerApi for TzktClient {
    async fn operations(
        &self,
        kind: OperationKind,
        range: LevelRange,
        cursor: Option<u64>,
        limit: usize,
    ) -> Result<OperationsPage> {
        let mut query = vec![
            ("level.gt", range.after.to_string()),
            ("level.le", range.up_to.to_string()),
            ("limit", limit.to_string()),
            ("sort.asc", "id".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("offset.cr", cursor.to_string()));
        }

        let path = format!("/v1/operations/{}", kind.collection());
        let body = self.http.get_json(&path, &query).await?;
        let items = body
            .as_array()
            .ok_or_else(|| SyncError::Malformed(format!("{path} did not return an array")))?;

        Ok(decode_page(items, kind))
    }

    async fn head(&self) -> Result<u64> {
        let body = self.http.get_json("/v1/head", &[]).await?;
        Fields::of(&body, "head")?.u64("level")
    }

    async fn blocks(&self, range: LevelRange, limit: usize) -> Result<Vec<BlockRef>> {
        let query = [
            ("level.gt", range.after.to_string()),
            ("level.le", range.up_to.to_string()),
            ("sort.desc", "level".to_string()),
            ("limit", limit.to_string()),
            ("select", "hash,level".to_string()),
        ];
        let body = self.http.get_json("/v1/blocks", &query).await?;
        Ok(decode_items(&body, "block", decode_block))
    }

    async fn consensus_rights(&self, level: u64) -> Result<Vec<String>> {
        let query = [
            ("level", level.to_string()),
            ("type", "endorsing".to_string()),
            ("limit", "10000".to_string()),
        ];
        let body = self.http.get_json("/v1/rights", &query).await?;
        Ok(decode_items(&body, "right", |value| {
            let right = Fields::of(value, "right")?;
            Ok(right.object("baker", "right baker")?.str("address")?.to_string())
        }))
    }

    async fn delegates(&self) -> Result<Vec<Delegate>> {
        let query = [
            ("active", "true".to_string()),
            ("select", "address,publicKey".to_string()),
            ("limit", "10000".to_string()),
        ];
        let body = self.http.get_json("/v1/delegates", &query).await?;
        let delegates = decode_items(&body, "delegate", |value| {
            let delegate = Fields::of(value, "delegate")?;
            let address = delegate.str("address")?;
            Ok(delegate.opt_str("publicKey")?.map(|key| Delegate {
                address: address.to_string(),
                public_key: key.to_string(),
            }))
        });
        // Unrevealed delegates have no key to verify against.
        Ok(delegates.into_iter().flatten().collect())
    }
}

/// Decode each element of an array, skipping the malformed ones.
fn decode_items<T>(
    body: &Value,
    what: &'static str,
    decode: impl Fn(&Value) -> Result<T>,
) -> Vec<T> {
    let Some(items) = body.as_array() else {
        warn!("Expected an array of {}s, got {}", what, body);
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match decode(item) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping malformed {}: {}", what, e);
                None
            }
        })
        .collect()
}

/// Decode an operations page. `fetched` and `last_id` count raw items so a
/// malformed item never stalls pagination.
pub fn decode_page(items: &[Value], kind: OperationKind) -> OperationsPage {
    let last_id = items
        .iter()
        .rev()
        .find_map(|item| item.get("id").and_then(Value::as_u64));

    let mut operations = Vec::with_capacity(items.len());
    for item in items {
        match decode_confirmed(item, Some(kind)) {
            Ok(op) => operations.push(op),
            Err(e) => warn!("Skipping malformed {} operation: {}", kind, e),
        }
    }

    OperationsPage {
        operations,
        fetched: items.len(),
        last_id,
    }
}

/// Decode a block reference.
pub fn decode_block(value: &Value) -> Result<BlockRef> {
    let block = Fields::of(value, "block")?;
    Ok(BlockRef {
        hash: block.str("hash")?.to_string(),
        level: block.u64("level")?,
    })
}

/// Decode one confirmed operation.
///
/// The kind comes from the `type` field; `fallback` is used when it is absent.
pub fn decode_confirmed(value: &Value, fallback: Option<OperationKind>) -> Result<ConfirmedOperation> {
    let op = Fields::of(value, "operation")?;

    let kind = match op.opt_str("type")? {
        Some(t) => OperationKind::from_indexer_type(t)
            .ok_or_else(|| tzmempool_core::CoreError::UnknownKind(t.to_string()))?,
        None => fallback.ok_or(SyncError::MissingField {
            field: "type",
            context: "operation",
        })?,
    };

    Ok(ConfirmedOperation {
        id: op.u64("id")?,
        hash: op.str("hash")?.to_string(),
        level: op.u64("level")?,
        block: op.str("block")?.to_string(),
        kind,
        sender: first_address(&op, &["sender", "delegate", "account", "baker", "accuser"])?,
        target: first_address(&op, &["target", "newDelegate", "originatedContract", "offender"])?,
    })
}

fn first_address(op: &Fields<'_>, names: &[&'static str]) -> Result<Option<String>> {
    for &name in names {
        if let Some(account) = op.opt_object(name, "account")? {
            if let Some(address) = account.opt_str("address")? {
                return Ok(Some(address.to_string()));
            }
        }
    }
    Ok(None)
}
