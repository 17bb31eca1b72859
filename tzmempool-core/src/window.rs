//! Reorg-aware window of recently seen blocks.
//!
//! The window keeps the most recent blocks in non-decreasing level order.
//! Adding a block past capacity evicts the oldest one through
//! [`WindowListener::on_pop`]; a reorg message pops every block above the
//! reorg level through [`WindowListener::on_rollback`], most recent first.
//! A data block whose level is already held under another hash replaces
//! that block and everything above it.

use std::collections::VecDeque;
use std::fmt;

use crate::error::{CoreError, Result};

/// Default number of tracked blocks.
pub const DEFAULT_CAPACITY: usize = 60;

/// Kind of chain message an entry was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Heartbeat carrying the current state level
    State,
    /// A new confirmed block
    Data,
    /// History above the carried level is invalid
    Reorg,
}

/// A block tracked by the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    /// Block hash operations reference as their branch
    pub branch: String,
    pub level: u64,
    pub message_type: MessageType,
}

impl WindowEntry {
    /// Create a new entry.
    pub fn new(branch: impl Into<String>, level: u64, message_type: MessageType) -> Self {
        Self {
            branch: branch.into(),
            level,
            message_type,
        }
    }
}

/// Callbacks invoked by the window.
pub trait WindowListener {
    type Error;

    /// The entry fell out of the window: pending operations built on it can expire.
    fn on_pop(&mut self, entry: &WindowEntry) -> std::result::Result<(), Self::Error>;

    /// The entry was rolled back by a reorg to `level`.
    ///
    /// May be delivered more than once for the same entry when the caller retries.
    fn on_rollback(&mut self, entry: &WindowEntry, level: u64)
        -> std::result::Result<(), Self::Error>;
}

/// A listener callback failed.
///
/// The entry has already left the window; it is handed back so the caller
/// can retry the callback.
#[derive(Debug)]
pub struct WindowError<E> {
    pub entry: WindowEntry,
    /// Level the window was rolling back to, `None` when evicting
    pub rollback_level: Option<u64>,
    pub source: E,
}

impl<E: fmt::Display> fmt::Display for WindowError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "window callback failed for block {} at level {}: {}",
            self.entry.branch, self.entry.level, self.source
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for WindowError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Bounded, level-ordered buffer of recent blocks.
#[derive(Debug, Clone)]
pub struct BlockWindow {
    entries: VecDeque<WindowEntry>,
    capacity: usize,
}

impl BlockWindow {
    /// Create a window holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CoreError::Config("block window capacity must be positive".into()));
        }
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Apply a chain message to the window.
    pub fn add<L: WindowListener>(
        &mut self,
        entry: WindowEntry,
        listener: &mut L,
    ) -> std::result::Result<(), WindowError<L::Error>> {
        match entry.message_type {
            MessageType::State => Ok(()),
            MessageType::Reorg => self.rollback_to(entry.level, listener),
            MessageType::Data => {
                let replaced = self
                    .entries
                    .iter()
                    .any(|e| e.level == entry.level && e.branch != entry.branch);
                if replaced {
                    self.rollback_while(entry.level.saturating_sub(1), listener, |e| {
                        e.level >= entry.level
                    })?;
                } else {
                    // A block below the tip implies the blocks above it were replaced.
                    self.rollback_to(entry.level, listener)?;
                }
                if self.entries.back() == Some(&entry) {
                    return Ok(());
                }

                while self.entries.len() >= self.capacity {
                    let Some(oldest) = self.entries.pop_front() else {
                        break;
                    };
                    if let Err(source) = listener.on_pop(&oldest) {
                        return Err(WindowError {
                            entry: oldest,
                            rollback_level: None,
                            source,
                        });
                    }
                }
                self.entries.push_back(entry);
                Ok(())
            }
        }
    }

    fn rollback_to<L: WindowListener>(
        &mut self,
        level: u64,
        listener: &mut L,
    ) -> std::result::Result<(), WindowError<L::Error>> {
        self.rollback_while(level, listener, |last| last.level > level)
    }

    /// Pop the most recent entries matching `stale`, reporting each as rolled back to `level`.
    fn rollback_while<L: WindowListener>(
        &mut self,
        level: u64,
        listener: &mut L,
        stale: impl Fn(&WindowEntry) -> bool,
    ) -> std::result::Result<(), WindowError<L::Error>> {
        while self.entries.back().is_some_and(&stale) {
            let Some(popped) = self.entries.pop_back() else {
                break;
            };
            if let Err(source) = listener.on_rollback(&popped, level) {
                return Err(WindowError {
                    entry: popped,
                    rollback_level: Some(level),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Remaining capacity.
    pub fn space(&self) -> usize {
        self.capacity - self.entries.len()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tracked blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Level of the most recent block.
    pub fn last_level(&self) -> Option<u64> {
        self.entries.back().map(|e| e.level)
    }

    /// Iterate entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        popped: Vec<u64>,
        rolled_back: Vec<(u64, u64)>,
        fail_rollback: bool,
    }

    impl WindowListener for Recorder {
        type Error = String;

        fn on_pop(&mut self, entry: &WindowEntry) -> std::result::Result<(), String> {
            self.popped.push(entry.level);
            Ok(())
        }

        fn on_rollback(&mut self, entry: &WindowEntry, level: u64) -> std::result::Result<(), String> {
            if self.fail_rollback {
                return Err("store unavailable".into());
            }
            self.rolled_back.push((entry.level, level));
            Ok(())
        }
    }

    fn data(level: u64) -> WindowEntry {
        WindowEntry::new(format!("B{level}"), level, MessageType::Data)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BlockWindow::new(0).is_err());
    }

    #[test]
    fn test_state_is_ignored() {
        let mut window = BlockWindow::new(3).unwrap();
        let mut rec = Recorder::default();
        window.add(WindowEntry::new("", 10, MessageType::State), &mut rec).unwrap();
        assert!(window.is_empty());
        assert_eq!(window.space(), 3);
    }

    #[test]
    fn test_eviction_calls_pop() {
        let mut window = BlockWindow::new(2).unwrap();
        let mut rec = Recorder::default();
        for level in 1..=4 {
            window.add(data(level), &mut rec).unwrap();
        }
        assert_eq!(rec.popped, vec![1, 2]);
        assert_eq!(window.iter().map(|e| e.level).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_reorg_pops_most_recent_first() {
        let mut window = BlockWindow::new(10).unwrap();
        let mut rec = Recorder::default();
        for level in 10..=13 {
            window.add(data(level), &mut rec).unwrap();
        }

        window.add(WindowEntry::new("", 11, MessageType::Reorg), &mut rec).unwrap();

        assert_eq!(rec.rolled_back, vec![(13, 11), (12, 11)]);
        assert_eq!(window.iter().map(|e| e.level).collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(window.space(), 8);
    }

    #[test]
    fn test_lower_data_block_rolls_back_above() {
        let mut window = BlockWindow::new(10).unwrap();
        let mut rec = Recorder::default();
        for level in [5, 6, 7] {
            window.add(data(level), &mut rec).unwrap();
        }
        window.add(data(6), &mut rec).unwrap();
        assert_eq!(rec.rolled_back, vec![(7, 6)]);
        assert_eq!(window.iter().map(|e| e.level).collect::<Vec<_>>(), vec![5, 6]);
    }

    #[test]
    fn test_same_level_block_replaces_tip() {
        let mut window = BlockWindow::new(10).unwrap();
        let mut rec = Recorder::default();
        for level in 10..=12 {
            window.add(data(level), &mut rec).unwrap();
        }

        window
            .add(WindowEntry::new("B12prime", 12, MessageType::Data), &mut rec)
            .unwrap();

        assert_eq!(rec.rolled_back, vec![(12, 11)]);
        let branches: Vec<_> = window.iter().map(|e| e.branch.as_str()).collect();
        assert_eq!(branches, vec!["B10", "B11", "B12prime"]);
    }

    #[test]
    fn test_replaced_lower_block_rolls_back_above() {
        let mut window = BlockWindow::new(10).unwrap();
        let mut rec = Recorder::default();
        for level in 10..=13 {
            window.add(data(level), &mut rec).unwrap();
        }

        window
            .add(WindowEntry::new("B12prime", 12, MessageType::Data), &mut rec)
            .unwrap();

        assert_eq!(rec.rolled_back, vec![(13, 11), (12, 11)]);
        assert_eq!(window.iter().map(|e| e.level).collect::<Vec<_>>(), vec![10, 11, 12]);
    }

    #[test]
    fn test_repeated_tip_is_kept_once() {
        let mut window = BlockWindow::new(10).unwrap();
        let mut rec = Recorder::default();
        window.add(data(4), &mut rec).unwrap();
        window.add(data(4), &mut rec).unwrap();
        assert_eq!(window.len(), 1);
        assert!(rec.rolled_back.is_empty());
    }

    #[test]
    fn test_failed_rollback_returns_entry() {
        let mut window = BlockWindow::new(10).unwrap();
        let mut rec = Recorder::default();
        for level in [1, 2, 3] {
            window.add(data(level), &mut rec).unwrap();
        }
        rec.fail_rollback = true;

        let err = window
            .add(WindowEntry::new("", 1, MessageType::Reorg), &mut rec)
            .unwrap_err();
        assert_eq!(err.entry.level, 3);
        assert_eq!(err.rollback_level, Some(1));
        assert_eq!(window.last_level(), Some(2));
        assert!(err.to_string().contains("store unavailable"));
    }
}
