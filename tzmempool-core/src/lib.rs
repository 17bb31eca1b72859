//! # tzmempool core
//!
//! **Synchronous building blocks of the mempool tracker**
//!
//! This crate holds everything that does not touch the network: the
//! operation data model, the reorg-aware block window, the merge-sort
//! accumulator used during catch-up, canonical forging of endorsement
//! bytes, and signature checks for the three Tezos key families.
//!
//! ## Features
//!
//! - **Deterministic**: same inputs produce the same forged bytes and the same merge order
//! - **Minimal**: no async, no I/O
//! - **Infallible verification**: a signature check answers `true` or `false`, never an error
//!
//! ## Quick Start
//!
//! ```rust
//! use tzmempool_core::{BlockWindow, MessageType, WindowEntry, WindowListener};
//!
//! struct Log(Vec<u64>);
//!
//! impl WindowListener for Log {
//!     type Error = std::convert::Infallible;
//!
//!     fn on_pop(&mut self, entry: &WindowEntry) -> Result<(), Self::Error> {
//!         self.0.push(entry.level);
//!         Ok(())
//!     }
//!
//!     fn on_rollback(&mut self, _entry: &WindowEntry, _level: u64) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! let mut window = BlockWindow::new(2).unwrap();
//! let mut log = Log(Vec::new());
//! for level in 1..=3 {
//!     let entry = WindowEntry::new(format!("B{level}"), level, MessageType::Data);
//!     window.add(entry, &mut log).unwrap();
//! }
//! assert_eq!(log.0, vec![1]);
//! assert_eq!(window.space(), 0);
//! ```

pub mod encoding;
pub mod error;
pub mod filter;
pub mod forge;
pub mod merge;
pub mod operation;
pub mod signature;
pub mod window;

// Re-export main types for convenience
pub use error::CoreError;
pub use filter::Interest;
pub use merge::{BlockAccumulator, BlockOperations, MergeQueue, OperationsPage};
pub use operation::{
    ConfirmedOperation, MempoolOperation, OperationContent, OperationKind, OperationStatus,
};
pub use signature::PublicKey;
pub use window::{BlockWindow, MessageType, WindowEntry, WindowError, WindowListener};
