//! Mempool polling.
//!
//! One polling loop per node endpoint. Each iteration checks that the node
//! is not behind the confirmed chain, reads its pending operations and
//! pushes them onto a shared bounded queue; a full queue blocks the poller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tzmempool_core::MempoolOperation;

use crate::error::{Result, SyncError};
use crate::node::NodeApi;

/// Capacity of the queue shared by all pollers of a network.
pub const QUEUE_CAPACITY: usize = 1024;

/// Create the queue pollers write to.
pub fn channel() -> (mpsc::Sender<MempoolOperation>, mpsc::Receiver<MempoolOperation>) {
    mpsc::channel(QUEUE_CAPACITY)
}

/// Concurrent pollers over a network's nodes.
pub struct MempoolReceiver {
    network: String,
    nodes: Vec<Arc<dyn NodeApi>>,
    interval: Duration,
    confirmed_level: Arc<AtomicU64>,
}

impl MempoolReceiver {
    /// Create a receiver polling `nodes` every `interval`.
    pub fn new(network: impl Into<String>, nodes: Vec<Arc<dyn NodeApi>>, interval: Duration) -> Self {
        Self {
            network: network.into(),
            nodes,
            interval,
            confirmed_level: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared handle on the last known confirmed level.
    pub fn confirmed_level(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.confirmed_level)
    }

    /// Update the last known confirmed level.
    pub fn set_confirmed_level(&self, level: u64) {
        self.confirmed_level.store(level, Ordering::Relaxed);
    }

    /// Poll `node` once and push every pending operation to `tx`.
    ///
    /// Returns the number of operations sent.
    pub async fn poll_once(
        node: &dyn NodeApi,
        confirmed_level: u64,
        tx: &mpsc::Sender<MempoolOperation>,
    ) -> Result<usize> {
        let header = node.header().await?;
        if header.level + 1 < confirmed_level {
            return Err(SyncError::StaleNode {
                url: node.url().to_string(),
                node_level: header.level,
                confirmed_level,
            });
        }

        let operations = node.pending_operations().await?;
        let mut sent = 0;
        for mut operation in operations {
            operation.level = header.level;
            tx.send(operation)
                .await
                .map_err(|_| SyncError::ChannelClosed("mempool queue"))?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Start one polling task per node.
    pub fn spawn(
        self,
        tx: mpsc::Sender<MempoolOperation>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.nodes
            .iter()
            .map(|node| {
                let node = Arc::clone(node);
                let tx = tx.clone();
                let cancel = cancel.clone();
                let network = self.network.clone();
                let confirmed = Arc::clone(&self.confirmed_level);
                let interval = self.interval;

                tokio::spawn(async move {
                    info!("[{}] Polling mempool of {}", network, node.url());
                    loop {
                        let level = confirmed.load(Ordering::Relaxed);
                        match Self::poll_once(node.as_ref(), level, &tx).await {
                            Ok(sent) => debug!("[{}] {} pending operations from {}", network, sent, node.url()),
                            Err(SyncError::ChannelClosed(_)) => break,
                            Err(e) => warn!("[{}] Mempool poll of {} failed: {}", network, node.url(), e),
                        }

                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                    info!("[{}] Stopped polling {}", network, node.url());
                })
            })
            .collect()
    }
}
