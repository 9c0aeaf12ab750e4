//! [`FollowerDb`] implementation wrapping a Fjall keyspace.

use std::path::Path;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use mdsync_types::{BUCKET_SEPARATOR, Item};
use tracing::{debug, trace};

use crate::DbError;

type Result<T> = std::result::Result<T, DbError>;

/// Database names holding cluster-internal state rather than bucket metadata.
pub const SYSTEM_DATABASES: &[&str] = &["sdb", "stdb", "dbAttributes"];

/// Whether a database (by directory name) must be left out of scans.
pub fn is_system_database(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| SYSTEM_DATABASES.contains(&name))
}

/// Metadata database of one follower, backed by Fjall.
pub struct FollowerDb {
    #[allow(dead_code)]
    db: Database,
    /// `bucket/objectKey` → raw JSON metadata.
    metadata: Keyspace,
    /// Keeps the directory of a temporary database alive.
    _tmp: Option<tempfile::TempDir>,
}

impl FollowerDb {
    /// Open a persistent database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init(db, None)
    }

    /// Open a temporary database that is removed on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init(db, Some(tmp))
    }

    fn init(db: Database, tmp: Option<tempfile::TempDir>) -> Result<Self> {
        let metadata = db.keyspace("metadata", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            metadata,
            _tmp: tmp,
        })
    }

    /// Store the metadata of `bucket/objectKey`.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.metadata.insert(key.as_bytes(), value.as_bytes())?;
        debug!(key, "stored metadata entry");
        Ok(())
    }

    /// Fetch the metadata stored under a full key.
    #[cfg(test)]
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.metadata.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes.to_vec())?)),
            None => Ok(None),
        }
    }

    /// Iterate over all object entries in key order.
    ///
    /// Entries whose key carries no bucket prefix are internal bookkeeping
    /// and are skipped.
    pub fn scan(&self) -> impl Iterator<Item = Result<Item>> + '_ {
        self.metadata.iter().filter_map(|guard| {
            let entry = guard.into_inner().map_err(DbError::from).and_then(|(k, v)| {
                Ok(Item {
                    key: String::from_utf8(k.to_vec())?,
                    value: String::from_utf8(v.to_vec())?,
                })
            });
            match entry {
                Ok(item) if !item.key.contains(BUCKET_SEPARATOR) => {
                    trace!(key = %item.key, "skipping internal entry");
                    None
                }
                other => Some(other),
            }
        })
    }
}
