use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::error::ErrorKind;
use super::event::TargetRecord;
use crate::services::Directory;

/// Default bound on a single directory query.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable point-in-time copy of the target list.
pub type Snapshot = Arc<[TargetRecord]>;

/// Last known good target inventory.
///
/// The snapshot is published through a watch channel: a refresh swaps the
/// whole `Arc` in one step, and readers clone the pointer, so no reader ever
/// sees a partially replaced list.
#[derive(Debug, Clone)]
pub struct InventoryCache {
    tx: Arc<watch::Sender<Snapshot>>,
    refresh_timeout: Duration,
}

impl Default for InventoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryCache {
    /// Empty until the first successful refresh.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::from(Vec::new()));
        Self {
            tx: Arc::new(tx),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Queries the directory and replaces the snapshot wholesale on success.
    /// On failure or timeout the previous snapshot is kept.
    pub async fn refresh(&self, directory: &dyn Directory) -> Result<usize, ErrorKind> {
        let query = tokio::time::timeout(self.refresh_timeout, directory.list_targets());
        match query.await {
            Ok(Ok(targets)) => {
                let count = targets.len();
                self.replace(targets);
                debug!(targets = count, "inventory refreshed");
                Ok(count)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "inventory refresh failed, keeping last snapshot");
                Err(ErrorKind::InventoryUnavailable)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.refresh_timeout.as_millis() as u64,
                    "inventory refresh timed out, keeping last snapshot"
                );
                Err(ErrorKind::InventoryUnavailable)
            }
        }
    }

    pub fn replace(&self, targets: Vec<TargetRecord>) {
        self.tx.send_replace(Snapshot::from(targets));
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }
}
