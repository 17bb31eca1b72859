//! Merge-sort of per-kind operation pages into per-block operation sets.
//!
//! During catch-up every tracked kind is paginated independently. The
//! [`MergeQueue`] keeps one buffer per kind and only releases the globally
//! lowest-level item once every unfinished kind has something buffered, so
//! items come out in ascending level order across all kinds. The
//! [`BlockAccumulator`] groups consecutive same-level items into one
//! [`BlockOperations`].

use std::collections::{BTreeMap, VecDeque};

use crate::error::{CoreError, Result};
use crate::operation::{ConfirmedOperation, OperationKind};

/// One page fetched for one kind.
#[derive(Debug, Clone, Default)]
pub struct OperationsPage {
    /// Well-formed operations of the page
    pub operations: Vec<ConfirmedOperation>,
    /// Number of raw items returned, malformed ones included
    pub fetched: usize,
    /// Id of the last raw item, used as the next cursor
    pub last_id: Option<u64>,
}

#[derive(Debug)]
struct SyncTable {
    kind: OperationKind,
    last_id: Option<u64>,
    finished: bool,
    items: VecDeque<ConfirmedOperation>,
}

impl SyncTable {
    fn head_level(&self) -> Option<u64> {
        self.items.front().map(|op| op.level)
    }
}

/// Per-kind buffers merged by level.
#[derive(Debug)]
pub struct MergeQueue {
    tables: Vec<SyncTable>,
    page_size: usize,
}

impl MergeQueue {
    /// Create a queue over the given kinds.
    pub fn new(kinds: &[OperationKind], page_size: usize) -> Result<Self> {
        if kinds.is_empty() {
            return Err(CoreError::Config("at least one operation kind is required".into()));
        }
        if page_size == 0 {
            return Err(CoreError::Config("page size must be positive".into()));
        }
        let tables = kinds
            .iter()
            .map(|&kind| SyncTable {
                kind,
                last_id: None,
                finished: false,
                items: VecDeque::new(),
            })
            .collect();
        Ok(Self { tables, page_size })
    }

    /// Page size used to detect the last page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Kinds that must be fetched before anything else can be drained, with their cursors.
    pub fn pending_fetches(&self) -> Vec<(OperationKind, Option<u64>)> {
        self.tables
            .iter()
            .filter(|t| !t.finished && t.items.is_empty())
            .map(|t| (t.kind, t.last_id))
            .collect()
    }

    /// Buffer a fetched page.
    pub fn push_page(&mut self, kind: OperationKind, page: OperationsPage) {
        let page_size = self.page_size;
        let Some(table) = self.tables.iter_mut().find(|t| t.kind == kind) else {
            return;
        };

        // Without an id there is no way to ask for the next page.
        table.finished = page.fetched < page_size || page.last_id.is_none();
        if page.last_id.is_some() {
            table.last_id = page.last_id;
        }

        let mut operations = page.operations;
        operations.sort_by_key(|op| (op.level, op.id));
        table.items.extend(operations);
    }

    /// Pop the lowest-level buffered item.
    ///
    /// Returns `None` when a fetch is required first or everything is drained.
    pub fn pop_lowest(&mut self) -> Option<ConfirmedOperation> {
        if self.tables.iter().any(|t| !t.finished && t.items.is_empty()) {
            return None;
        }

        self.tables.sort_by(|a, b| {
            let (a_has, b_has) = (!a.items.is_empty(), !b.items.is_empty());
            b_has
                .cmp(&a_has)
                .then_with(|| a.head_level().cmp(&b.head_level()))
                .then_with(|| a.finished.cmp(&b.finished))
        });

        self.tables.first_mut()?.items.pop_front()
    }

    /// All kinds finished and all buffers empty.
    pub fn is_drained(&self) -> bool {
        self.tables.iter().all(|t| t.finished && t.items.is_empty())
    }
}

/// Operations confirmed in one block, deduplicated by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOperations {
    pub level: u64,
    /// Block hash
    pub block: String,
    /// Operation hash -> first record seen for each kind
    pub operations: BTreeMap<String, BTreeMap<OperationKind, ConfirmedOperation>>,
}

impl BlockOperations {
    /// Start a block from its first operation.
    pub fn new(first: ConfirmedOperation) -> Self {
        let mut block = Self {
            level: first.level,
            block: first.block.clone(),
            operations: BTreeMap::new(),
        };
        block.insert(first);
        block
    }

    /// Add an operation of the same level; duplicates are ignored.
    pub fn insert(&mut self, operation: ConfirmedOperation) {
        self.operations
            .entry(operation.hash.clone())
            .or_default()
            .entry(operation.kind)
            .or_insert(operation);
    }

    /// Number of distinct operation hashes.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the block holds no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Every per-kind record of the block.
    pub fn records(&self) -> impl Iterator<Item = &ConfirmedOperation> {
        self.operations.values().flat_map(|by_kind| by_kind.values())
    }
}

/// Groups a level-ordered stream of operations into blocks.
#[derive(Debug, Default)]
pub struct BlockAccumulator {
    current: Option<BlockOperations>,
}

impl BlockAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next operation; returns the previous block once the level changes.
    pub fn push(&mut self, operation: ConfirmedOperation) -> Option<BlockOperations> {
        if let Some(block) = self.current.as_mut() {
            if block.level == operation.level {
                block.insert(operation);
                return None;
            }
        }
        self.current.replace(BlockOperations::new(operation))
    }

    /// Take the partially accumulated block, if any.
    pub fn flush(&mut self) -> Option<BlockOperations> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: u64, hash: &str, level: u64, kind: OperationKind) -> ConfirmedOperation {
        ConfirmedOperation {
            id,
            hash: hash.to_string(),
            level,
            block: format!("B{level}"),
            kind,
            sender: None,
            target: None,
        }
    }

    #[test]
    fn test_empty_kinds_rejected() {
        assert!(matches!(MergeQueue::new(&[], 10), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_pop_waits_for_unfetched_kind() {
        let mut queue =
            MergeQueue::new(&[OperationKind::Transaction, OperationKind::Reveal], 10).unwrap();
        assert_eq!(queue.pending_fetches().len(), 2);

        queue.push_page(
            OperationKind::Transaction,
            OperationsPage {
                operations: vec![op(1, "oo1", 5, OperationKind::Transaction)],
                fetched: 1,
                last_id: Some(1),
            },
        );
        assert!(queue.pop_lowest().is_none());
        assert_eq!(queue.pending_fetches(), vec![(OperationKind::Reveal, None)]);
    }

    #[test]
    fn test_full_page_keeps_cursor() {
        let mut queue = MergeQueue::new(&[OperationKind::Transaction], 2).unwrap();
        queue.push_page(
            OperationKind::Transaction,
            OperationsPage {
                operations: vec![
                    op(7, "oo1", 5, OperationKind::Transaction),
                    op(8, "oo2", 5, OperationKind::Transaction),
                ],
                fetched: 2,
                last_id: Some(8),
            },
        );
        assert!(queue.pop_lowest().is_some());
        assert!(queue.pop_lowest().is_some());
        assert_eq!(
            queue.pending_fetches(),
            vec![(OperationKind::Transaction, Some(8))]
        );
        assert!(!queue.is_drained());
    }

    #[test]
    fn test_accumulator_flushes_on_level_change() {
        let mut acc = BlockAccumulator::new();
        assert!(acc.push(op(1, "oo1", 5, OperationKind::Transaction)).is_none());
        assert!(acc.push(op(2, "oo1", 5, OperationKind::Reveal)).is_none());
        let flushed = acc.push(op(3, "oo2", 6, OperationKind::Transaction)).unwrap();

        assert_eq!(flushed.level, 5);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed.records().count(), 2);
        assert_eq!(acc.flush().unwrap().level, 6);
        assert!(acc.flush().is_none());
    }
}
