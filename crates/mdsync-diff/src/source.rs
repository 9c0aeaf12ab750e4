//! Ordered local inputs of the diff engine.

use mdsync_db::FollowerDb;
use mdsync_types::Item;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::DiffError;

/// An ordered stream of local items.
#[async_trait::async_trait]
pub trait LocalSource: Send {
    /// The next item in key order, `None` at end of input.
    async fn next_item(&mut self) -> Result<Option<Item>, DiffError>;
}

#[async_trait::async_trait]
impl LocalSource for mpsc::Receiver<Result<Item, DiffError>> {
    async fn next_item(&mut self) -> Result<Option<Item>, DiffError> {
        self.recv().await.transpose()
    }
}

#[async_trait::async_trait]
impl LocalSource for std::vec::IntoIter<Item> {
    async fn next_item(&mut self) -> Result<Option<Item>, DiffError> {
        Ok(self.next())
    }
}

/// Scan `db` on a blocking thread, feeding a bounded channel of `capacity`
/// items.
///
/// The scan stops at the first read error (which is forwarded) or as soon
/// as the receiver is dropped.
pub fn spawn_db_reader(db: FollowerDb, capacity: usize) -> mpsc::Receiver<Result<Item, DiffError>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::task::spawn_blocking(move || {
        let mut sent = 0_u64;
        for entry in db.scan() {
            let failed = entry.is_err();
            if tx.blocking_send(entry.map_err(DiffError::from)).is_err() {
                debug!(sent, "diff engine stopped reading, ending scan");
                return;
            }
            if failed {
                warn!(sent, "follower database scan failed");
                return;
            }
            sent += 1;
        }
        debug!(sent, "follower database scan complete");
    });
    rx
}
