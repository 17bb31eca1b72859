//! Operation ledger backed by SQLite.
//!
//! One table per operation kind, keyed by `(network, hash)`, plus a `state`
//! table holding the last confirmed level of each network. Status changes
//! follow a fixed state machine:
//!
//! ```text
//!   mempool bucket ──confirm──▶ in_chain
//!   applied ──window eviction──▶ expired
//!   applied / in_chain@L ──rollback to L──▶ branch_refused
//!   in_chain above L ──rollback to L──▶ applied
//! ```
//!
//! Every multi-row change runs in a single transaction.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;
use tzmempool_core::{
    BlockOperations, Interest, MempoolOperation, OperationContent, OperationKind, OperationStatus,
};

use crate::error::{Result, SyncError};

/// A row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOperation {
    pub hash: String,
    pub branch: String,
    pub status: OperationStatus,
    pub kind: String,
    pub signature: String,
    pub level: u64,
    pub errors: Option<Value>,
    pub expiration_level: Option<u64>,
    pub source: Option<String>,
    /// Only ever set on endorsements
    pub baker: Option<String>,
}

/// An endorsement waiting for its baker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEndorsement {
    pub hash: String,
    pub branch: String,
    pub signature: String,
    /// Endorsed level, as signed
    pub level: u64,
    /// Level stored with the row, the paging key together with the hash
    pub stored_level: u64,
}

/// Rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub in_chain: usize,
    pub other: usize,
}

/// Persistent operation store shared by every worker of a process.
#[derive(Debug, Clone)]
pub struct OperationLedger {
    conn: Arc<Mutex<Connection>>,
}

/// Run synchronous ledger work from async code.
///
/// On a multi-threaded runtime the worker thread hands its other tasks over
/// while `f` waits on SQLite; elsewhere `f` simply runs in place.
pub fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn kind_columns(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Endorsement => ",\n    baker TEXT",
        _ => "",
    }
}

impl OperationLedger {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SyncError::Config("ledger connection lock poisoned".into()))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Record a mempool observation.
    ///
    /// Contents are grouped by kind; one row per tracked kind is inserted
    /// unless a row for the hash already exists. Returns the number of new rows.
    pub fn insert_mempool(
        &self,
        network: &str,
        op: &MempoolOperation,
        interest: &Interest,
        expiration_level: Option<u64>,
    ) -> Result<usize> {
        let mut by_kind: BTreeMap<OperationKind, Vec<&OperationContent>> = BTreeMap::new();
        for content in op.contents.iter().filter(|c| interest.accepts_content(c)) {
            by_kind.entry(content.kind).or_default().push(content);
        }
        if by_kind.is_empty() {
            return Ok(0);
        }

        let errors = op.errors.as_ref().map(Value::to_string);
        let timestamp = now();

        self.with_tx(|tx| {
            let mut inserted = 0;
            for (kind, contents) in &by_kind {
                let content = Value::Array(
                    contents.iter().map(|c| Value::Object(c.fields.clone())).collect(),
                );
                let source = contents.iter().find_map(|c| c.source());
                inserted += tx.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} (network, hash, branch, status, kind, signature,
                             level, errors, expiration_level, source, content, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                        kind.table()
                    ),
                    params![
                        network,
                        op.hash,
                        op.branch,
                        op.status.as_str(),
                        kind.tag(),
                        op.signature.as_deref().unwrap_or_default(),
                        op.level as i64,
                        errors,
                        expiration_level.map(|l| l as i64),
                        source,
                        content.to_string(),
                        timestamp,
                    ],
                )?;
            }
            Ok(inserted)
        })
    }

    /// Mark every operation of a confirmed block `in_chain` and move the
    /// network's confirmed level forward to the block.
    ///
    /// Operations never seen in the mempool are inserted when they match
    /// the interest filter. Returns the number of rows touched.
    pub fn confirm_block(&self, network: &str, block: &BlockOperations, interest: &Interest) -> Result<usize> {
        let timestamp = now();
        let level = block.level as i64;

        self.with_tx(|tx| {
            let mut touched = 0;
            for record in block.records() {
                let table = record.kind.table();
                let updated = tx.execute(
                    &format!(
                        "UPDATE {table} SET status = 'in_chain', level = ?1, errors = NULL, updated_at = ?2
                         WHERE network = ?3 AND hash = ?4"
                    ),
                    params![level, timestamp, network, record.hash],
                )?;

                if updated == 0 && interest.accepts_confirmed(record) {
                    let content = serde_json::json!({
                        "block": record.block,
                        "target": record.target,
                    });
                    touched += tx.execute(
                        &format!(
                            "INSERT OR IGNORE INTO {table} (network, hash, branch, status, kind, signature,
                                 level, errors, expiration_level, source, content, created_at, updated_at)
                             VALUES (?1, ?2, '', 'in_chain', ?3, '', ?4, NULL, NULL, ?5, ?6, ?7, ?7)"
                        ),
                        params![
                            network,
                            record.hash,
                            record.kind.tag(),
                            level,
                            record.sender,
                            content.to_string(),
                            timestamp,
                        ],
                    )?;
                } else {
                    touched += updated;
                }
            }
            raise_state_level(tx, network, block.level, timestamp)?;
            Ok(touched)
        })
    }

    /// Expire `applied` operations built on a branch that left the window.
    pub fn expire(&self, network: &str, branch: &str) -> Result<usize> {
        let timestamp = now();
        self.with_tx(|tx| {
            let mut expired = 0;
            for kind in OperationKind::ALL {
                expired += tx.execute(
                    &format!(
                        "UPDATE {} SET status = 'expired', updated_at = ?1
                         WHERE network = ?2 AND branch = ?3 AND status = 'applied'",
                        kind.table()
                    ),
                    params![timestamp, network, branch],
                )?;
            }
            Ok(expired)
        })
    }

    /// Undo a branch after a reorg to `level` and store `level` as the
    /// confirmed level.
    ///
    /// `applied` rows and rows confirmed exactly at `level` become
    /// `branch_refused`; rows confirmed above `level` go back to `applied`.
    /// Safe to repeat.
    pub fn rollback(&self, network: &str, branch: &str, level: u64) -> Result<usize> {
        let timestamp = now();
        let level_i = level as i64;
        self.with_tx(|tx| {
            let mut changed = 0;
            for kind in OperationKind::ALL {
                let table = kind.table();
                changed += tx.execute(
                    &format!(
                        "UPDATE {table} SET status = 'branch_refused', updated_at = ?1
                         WHERE network = ?2 AND branch = ?3
                           AND (status = 'applied' OR (status = 'in_chain' AND level = ?4))"
                    ),
                    params![timestamp, network, branch, level_i],
                )?;
                changed += tx.execute(
                    &format!(
                        "UPDATE {table} SET status = 'applied', updated_at = ?1
                         WHERE network = ?2 AND branch = ?3 AND status = 'in_chain' AND level > ?4"
                    ),
                    params![timestamp, network, branch, level_i],
                )?;
            }
            write_state_level(tx, network, level, timestamp)?;
            Ok(changed)
        })
    }

    /// Delete old rows: `in_chain` ones older than `keep_in_chain`, the rest
    /// older than `keep_operations`, by last update.
    pub fn sweep(&self, network: &str, keep_operations: Duration, keep_in_chain: Duration) -> Result<SweepStats> {
        self.sweep_at(network, now(), keep_operations, keep_in_chain)
    }

    /// [`sweep`](Self::sweep) relative to the unix time `now`.
    pub fn sweep_at(
        &self,
        network: &str,
        now: i64,
        keep_operations: Duration,
        keep_in_chain: Duration,
    ) -> Result<SweepStats> {
        let in_chain_cutoff = now - keep_in_chain.as_secs() as i64;
        let other_cutoff = now - keep_operations.as_secs() as i64;
        self.with_tx(|tx| {
            let mut stats = SweepStats::default();
            for kind in OperationKind::ALL {
                let table = kind.table();
                stats.in_chain += tx.execute(
                    &format!(
                        "DELETE FROM {table} WHERE network = ?1 AND status = 'in_chain' AND updated_at < ?2"
                    ),
                    params![network, in_chain_cutoff],
                )?;
                stats.other += tx.execute(
                    &format!(
                        "DELETE FROM {table} WHERE network = ?1 AND status != 'in_chain' AND updated_at < ?2"
                    ),
                    params![network, other_cutoff],
                )?;
            }
            Ok(stats)
        })
    }

    /// Last confirmed level of a network, if any was stored.
    pub fn state_level(&self, network: &str) -> Result<Option<u64>> {
        self.with_tx(|tx| {
            let level: Option<i64> = tx
                .query_row(
                    "SELECT level FROM state WHERE network = ?1",
                    params![network],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(level.map(|l| l as u64))
        })
    }

    /// Overwrite the confirmed level of a network.
    pub fn set_state_level(&self, network: &str, level: u64) -> Result<()> {
        let timestamp = now();
        self.with_tx(|tx| write_state_level(tx, network, level, timestamp))
    }

    /// Signed endorsements without a baker, lowest level first.
    ///
    /// `after` is the `(stored_level, hash)` of the last row of the previous
    /// page; `None` starts from the lowest level.
    pub fn endorsements_without_baker(
        &self,
        network: &str,
        after: Option<(u64, &str)>,
        limit: usize,
    ) -> Result<Vec<PendingEndorsement>> {
        let (after_level, after_hash) = after.map_or((-1, ""), |(level, hash)| (level as i64, hash));
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT hash, branch, signature, level, content FROM {}
                 WHERE network = ?1 AND baker IS NULL AND signature != '' AND branch != ''
                   AND (level > ?2 OR (level = ?2 AND hash > ?3))
                 ORDER BY level ASC, hash ASC LIMIT ?4",
                OperationKind::Endorsement.table()
            ))?;
            let rows = stmt.query_map(params![network, after_level, after_hash, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut pending = Vec::new();
            for row in rows {
                let (hash, branch, signature, level, content) = row?;
                pending.push(PendingEndorsement {
                    hash,
                    branch,
                    signature,
                    level: endorsed_level(&content).unwrap_or(level as u64),
                    stored_level: level as u64,
                });
            }
            Ok(pending)
        })
    }

    /// Assign the baker of an endorsement. Returns `false` if it already had one.
    pub fn set_baker(&self, network: &str, hash: &str, baker: &str) -> Result<bool> {
        let timestamp = now();
        self.with_tx(|tx| {
            let updated = tx.execute(
                &format!(
                    "UPDATE {} SET baker = ?1, updated_at = ?2
                     WHERE network = ?3 AND hash = ?4 AND baker IS NULL",
                    OperationKind::Endorsement.table()
                ),
                params![baker, timestamp, network, hash],
            )?;
            Ok(updated > 0)
        })
    }

    /// Look up a stored row.
    pub fn operation(&self, network: &str, kind: OperationKind, hash: &str) -> Result<Option<StoredOperation>> {
        let baker = match kind {
            OperationKind::Endorsement => "baker",
            _ => "NULL",
        };
        let row = self.with_tx(|tx| {
            Ok(tx
                .query_row(
                    &format!(
                        "SELECT hash, branch, status, kind, signature, level, errors,
                                expiration_level, source, {baker}
                         FROM {} WHERE network = ?1 AND hash = ?2",
                        kind.table()
                    ),
                    params![network, hash],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, Option<i64>>(7)?,
                            row.get::<_, Option<String>>(8)?,
                            row.get::<_, Option<String>>(9)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        let Some((hash, branch, status, kind, signature, level, errors, expiration_level, source, baker)) = row
        else {
            return Ok(None);
        };
        Ok(Some(StoredOperation {
            hash,
            branch,
            status: status.parse()?,
            kind,
            signature,
            level: level as u64,
            errors: errors.and_then(|e| serde_json::from_str(&e).ok()),
            expiration_level: expiration_level.map(|l| l as u64),
            source,
            baker,
        }))
    }
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS state (
            network TEXT PRIMARY KEY,
            level INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    )?;
    for kind in OperationKind::ALL {
        let table = kind.table();
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                network TEXT NOT NULL,
                hash TEXT NOT NULL,
                branch TEXT NOT NULL,
                status TEXT NOT NULL,
                kind TEXT NOT NULL,
                signature TEXT NOT NULL,
                level INTEGER NOT NULL,
                errors TEXT,
                expiration_level INTEGER,
                source TEXT,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL{extra},
                PRIMARY KEY (network, hash)
            );
            CREATE INDEX IF NOT EXISTS {table}_branch ON {table} (network, branch);
            CREATE INDEX IF NOT EXISTS {table}_status ON {table} (network, status, updated_at);",
            extra = kind_columns(kind)
        ))?;
    }
    tx.commit()?;
    debug!("Ledger schema ready ({} operation tables)", OperationKind::ALL.len());
    Ok(())
}

fn write_state_level(tx: &Transaction<'_>, network: &str, level: u64, timestamp: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO state (network, level, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (network) DO UPDATE SET level = excluded.level, updated_at = excluded.updated_at",
        params![network, level as i64, timestamp],
    )?;
    Ok(())
}

fn raise_state_level(tx: &Transaction<'_>, network: &str, level: u64, timestamp: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO state (network, level, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (network) DO UPDATE SET level = MAX(level, excluded.level),
                                             updated_at = excluded.updated_at",
        params![network, level as i64, timestamp],
    )?;
    Ok(())
}

/// Level field of the first stored content.
fn endorsed_level(content: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(content).ok()?;
    value.as_array()?.first()?.get("level")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tzmempool_core::ConfirmedOperation;

    const NET: &str = "mainnet";

    fn interest() -> Interest {
        Interest::new(OperationKind::ALL, Vec::new())
    }

    fn mempool(hash: &str, branch: &str, status: OperationStatus, kind: &str) -> MempoolOperation {
        let content = json!({"kind": kind, "source": "tz1src", "level": 41});
        MempoolOperation {
            hash: hash.into(),
            branch: branch.into(),
            status,
            signature: Some("sigX".into()),
            contents: vec![OperationContent {
                kind: kind.parse().unwrap(),
                fields: content.as_object().unwrap().clone(),
            }],
            errors: None,
            level: 40,
        }
    }

    fn block(level: u64, hashes: &[(&str, OperationKind)]) -> BlockOperations {
        let mut ops = hashes.iter().enumerate().map(|(i, (hash, kind))| ConfirmedOperation {
            id: i as u64,
            hash: hash.to_string(),
            level,
            block: format!("BL{level}"),
            kind: *kind,
            sender: Some("tz1src".into()),
            target: None,
        });
        let mut block = BlockOperations::new(ops.next().unwrap());
        ops.for_each(|op| block.insert(op));
        block
    }

    fn status(ledger: &OperationLedger, kind: OperationKind, hash: &str) -> OperationStatus {
        ledger.operation(NET, kind, hash).unwrap().unwrap().status
    }

    #[test]
    fn test_insert_or_ignore() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        let op = mempool("ooA", "BLa", OperationStatus::BranchDelayed, "transaction");
        assert_eq!(ledger.insert_mempool(NET, &op, &interest(), Some(100)).unwrap(), 1);

        let again = mempool("ooA", "BLa", OperationStatus::Applied, "transaction");
        assert_eq!(ledger.insert_mempool(NET, &again, &interest(), Some(100)).unwrap(), 0);

        let row = ledger.operation(NET, OperationKind::Transaction, "ooA").unwrap().unwrap();
        assert_eq!(row.status, OperationStatus::BranchDelayed);
        assert_eq!(row.expiration_level, Some(100));
        assert_eq!(row.source.as_deref(), Some("tz1src"));
    }

    #[test]
    fn test_interest_filters_insert() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        let only_reveals = Interest::new([OperationKind::Reveal], Vec::new());
        let op = mempool("ooT", "BLa", OperationStatus::Applied, "transaction");
        assert_eq!(ledger.insert_mempool(NET, &op, &only_reveals, None).unwrap(), 0);
        assert!(ledger.operation(NET, OperationKind::Transaction, "ooT").unwrap().is_none());
    }

    #[test]
    fn test_confirm_then_rollback() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        let op = mempool("ooA", "BLa", OperationStatus::Applied, "transaction");
        ledger.insert_mempool(NET, &op, &interest(), None).unwrap();

        ledger
            .confirm_block(NET, &block(100, &[("ooA", OperationKind::Transaction)]), &interest())
            .unwrap();
        let row = ledger.operation(NET, OperationKind::Transaction, "ooA").unwrap().unwrap();
        assert_eq!((row.status, row.level), (OperationStatus::InChain, 100));
        assert_eq!(ledger.state_level(NET).unwrap(), Some(100));

        // Rollback above the confirmation level leaves it alone.
        ledger.rollback(NET, "BLa", 101).unwrap();
        assert_eq!(status(&ledger, OperationKind::Transaction, "ooA"), OperationStatus::InChain);

        ledger.rollback(NET, "BLa", 99).unwrap();
        assert_eq!(status(&ledger, OperationKind::Transaction, "ooA"), OperationStatus::Applied);
        assert_eq!(ledger.state_level(NET).unwrap(), Some(99));
    }

    #[test]
    fn test_rollback_refuses_applied_and_same_level() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        for hash in ["ooA", "ooB"] {
            let op = mempool(hash, "BLx", OperationStatus::Applied, "transaction");
            ledger.insert_mempool(NET, &op, &interest(), None).unwrap();
        }
        ledger
            .confirm_block(NET, &block(70, &[("ooB", OperationKind::Transaction)]), &interest())
            .unwrap();

        ledger.rollback(NET, "BLx", 70).unwrap();
        assert_eq!(status(&ledger, OperationKind::Transaction, "ooA"), OperationStatus::BranchRefused);
        assert_eq!(status(&ledger, OperationKind::Transaction, "ooB"), OperationStatus::BranchRefused);

        // Repeated delivery is harmless.
        ledger.rollback(NET, "BLx", 70).unwrap();
        assert_eq!(status(&ledger, OperationKind::Transaction, "ooA"), OperationStatus::BranchRefused);
    }

    #[test]
    fn test_expire_only_touches_applied() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        let applied = mempool("ooA", "BLz", OperationStatus::Applied, "transaction");
        let refused = mempool("ooR", "BLz", OperationStatus::Refused, "transaction");
        let chained = mempool("ooC", "BLz", OperationStatus::Applied, "reveal");
        for op in [&applied, &refused, &chained] {
            ledger.insert_mempool(NET, op, &interest(), None).unwrap();
        }
        ledger
            .confirm_block(NET, &block(5, &[("ooC", OperationKind::Reveal)]), &interest())
            .unwrap();

        assert_eq!(ledger.expire(NET, "BLz").unwrap(), 1);
        assert_eq!(status(&ledger, OperationKind::Transaction, "ooA"), OperationStatus::Expired);
        assert_eq!(status(&ledger, OperationKind::Transaction, "ooR"), OperationStatus::Refused);
        assert_eq!(status(&ledger, OperationKind::Reveal, "ooC"), OperationStatus::InChain);
    }

    #[test]
    fn test_confirm_inserts_unseen_operations() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        let filtered = Interest::new([OperationKind::Transaction], vec!["tz1other".to_string()]);
        let touched = ledger
            .confirm_block(NET, &block(9, &[("ooN", OperationKind::Transaction)]), &filtered)
            .unwrap();
        assert_eq!(touched, 0);

        ledger
            .confirm_block(NET, &block(10, &[("ooN", OperationKind::Transaction)]), &interest())
            .unwrap();
        let row = ledger.operation(NET, OperationKind::Transaction, "ooN").unwrap().unwrap();
        assert_eq!(row.status, OperationStatus::InChain);
        assert_eq!(row.branch, "");
        assert_eq!(ledger.state_level(NET).unwrap(), Some(10));
    }

    #[test]
    fn test_state_level_only_rises_on_confirm() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        assert_eq!(ledger.state_level(NET).unwrap(), None);
        ledger.set_state_level(NET, 50).unwrap();
        ledger
            .confirm_block(NET, &block(45, &[("ooOld", OperationKind::Reveal)]), &interest())
            .unwrap();
        assert_eq!(ledger.state_level(NET).unwrap(), Some(50));
        assert_eq!(ledger.state_level("ghostnet").unwrap(), None);
    }

    #[test]
    fn test_sweep_thresholds() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        let op = mempool("ooA", "BLa", OperationStatus::Applied, "transaction");
        ledger.insert_mempool(NET, &op, &interest(), None).unwrap();
        let op = mempool("ooC", "BLa", OperationStatus::Applied, "reveal");
        ledger.insert_mempool(NET, &op, &interest(), None).unwrap();
        ledger
            .confirm_block(NET, &block(3, &[("ooC", OperationKind::Reveal)]), &interest())
            .unwrap();

        let later = now() + 3600;
        let stats = ledger
            .sweep_at(NET, later, Duration::from_secs(60), Duration::from_secs(7200))
            .unwrap();
        assert_eq!(stats, SweepStats { in_chain: 0, other: 1 });

        let stats = ledger
            .sweep_at(NET, later + 7200, Duration::from_secs(60), Duration::from_secs(7200))
            .unwrap();
        assert_eq!(stats.in_chain, 1);
    }

    #[test]
    fn test_endorsement_baker_roundtrip() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        let op = mempool("ooE", "BLe", OperationStatus::Applied, "endorsement");
        ledger.insert_mempool(NET, &op, &interest(), None).unwrap();

        let pending = ledger.endorsements_without_baker(NET, None, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].level, 41, "signed level comes from the content");
        let after = (pending[0].stored_level, pending[0].hash.as_str());
        assert!(ledger.endorsements_without_baker(NET, Some(after), 10).unwrap().is_empty());

        assert!(ledger.set_baker(NET, "ooE", "tz1baker").unwrap());
        assert!(!ledger.set_baker(NET, "ooE", "tz1other").unwrap());
        assert!(ledger.endorsements_without_baker(NET, None, 10).unwrap().is_empty());

        let row = ledger.operation(NET, OperationKind::Endorsement, "ooE").unwrap().unwrap();
        assert_eq!(row.baker.as_deref(), Some("tz1baker"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_on_worker_thread() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        blocking(|| ledger.set_state_level(NET, 7)).unwrap();
        assert_eq!(blocking(|| ledger.state_level(NET)).unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_blocking_on_current_thread() {
        let ledger = OperationLedger::open_in_memory().unwrap();
        assert_eq!(blocking(|| ledger.state_level(NET)).unwrap(), None);
    }

    #[test]
    fn test_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = OperationLedger::open(&path).unwrap();
            ledger.set_state_level(NET, 1234).unwrap();
        }
        let ledger = OperationLedger::open(&path).unwrap();
        assert_eq!(ledger.state_level(NET).unwrap(), Some(1234));
    }
}
