//! Shared harness for mdsync integration tests.
//!
//! Provides an in-memory leader and blob store so the diff engine and the
//! repair orchestrator can be chained without any network.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mdsync_db::FollowerDb;
use mdsync_diff::{DiffConfig, DiffEngine, DiffError, DiffProgressSnapshot, spawn_db_reader};
use mdsync_net::{BlobStatus, BlobStore, MetadataService, NetError};
use mdsync_types::{DiffEntry, Item};
use tokio::sync::mpsc;

// =========================================================================
// Leader
// =========================================================================

/// Leader metadata held in a sorted map of full `bucket/objectKey` keys.
#[derive(Default)]
pub struct InMemoryLeader {
    objects: Mutex<BTreeMap<String, String>>,
}

impl InMemoryLeader {
    /// Create a leader holding the given `(full key, value)` pairs.
    pub fn with(objects: &[(&str, &str)]) -> Self {
        let leader = Self::default();
        {
            let mut map = leader.objects.lock().unwrap();
            for (key, value) in objects {
                map.insert(key.to_string(), value.to_string());
            }
        }
        leader
    }

    /// Current value of a full key.
    pub fn value(&self, full_key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(full_key).cloned()
    }
}

fn full_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

#[async_trait]
impl MetadataService for InMemoryLeader {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<String>, NetError> {
        Ok(self.value(&full_key(bucket, key)))
    }

    async fn put_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), NetError> {
        self.objects
            .lock()
            .unwrap()
            .insert(full_key(bucket, key), value.to_string());
        Ok(())
    }

    async fn list_range(
        &self,
        bucket: &str,
        gt: Option<&str>,
        lte: Option<&str>,
        max_keys: usize,
    ) -> Result<Vec<Item>, NetError> {
        let prefix = full_key(bucket, "");
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| {
                let object_key = &key[prefix.len()..];
                gt.is_none_or(|gt| object_key > gt) && lte.is_none_or(|lte| object_key <= lte)
            })
            .take(max_keys)
            .map(|(key, value)| Item::new(key.as_str(), value.as_str()))
            .collect())
    }
}

// =========================================================================
// Blob store
// =========================================================================

/// Blob store knowing which blob keys exist.
#[derive(Default)]
pub struct InMemoryBlobs {
    present: HashSet<String>,
}

impl InMemoryBlobs {
    /// Create a store where exactly `keys` exist.
    pub fn with(keys: &[&str]) -> Self {
        Self {
            present: keys.iter().map(|key| key.to_string()).collect(),
        }
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobs {
    async fn probe(&self, blob_key: &str) -> Result<BlobStatus, NetError> {
        if self.present.contains(blob_key) {
            Ok(BlobStatus::Present)
        } else {
            Ok(BlobStatus::Missing)
        }
    }
}

// =========================================================================
// Helpers
// =========================================================================

/// Object metadata JSON stored on a single blob.
pub fn metadata(blob_key: &str, last_modified: &str) -> String {
    serde_json::json!({
        "location": [{ "key": blob_key }],
        "last-modified": last_modified,
    })
    .to_string()
}

/// Metadata JSON of one version of a versioned object.
pub fn versioned_metadata(blob_key: &str, version_id: &str, last_modified: &str) -> String {
    serde_json::json!({
        "location": [{ "key": blob_key }],
        "versionId": version_id,
        "last-modified": last_modified,
    })
    .to_string()
}

/// Create a temporary follower database holding `items`.
pub fn follower_db(items: &[(&str, &str)]) -> FollowerDb {
    let db = FollowerDb::open_temporary().unwrap();
    for (key, value) in items {
        db.put(key, value).unwrap();
    }
    db
}

/// Scan `db` against `leader` and collect every difference in order.
pub async fn run_diff(
    db: FollowerDb,
    leader: Arc<dyn MetadataService>,
    config: DiffConfig,
) -> Result<(Vec<DiffEntry>, DiffProgressSnapshot), DiffError> {
    let (tx, mut rx) = mpsc::channel(16);
    let collector = tokio::spawn(async move {
        let mut entries = Vec::new();
        while let Some(entry) = rx.recv().await {
            entries.push(entry);
        }
        entries
    });

    let engine = DiffEngine::new(leader, config.clone());
    let source = spawn_db_reader(db, config.max_buffer_size);
    let result = engine.run(source, &tx).await;
    drop(tx);
    let entries = collector.await.unwrap();
    result.map(|()| (entries, engine.progress().snapshot()))
}

/// Encode entries as a newline-delimited JSON difference file.
pub fn to_ndjson(entries: &[DiffEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut out, entry).unwrap();
        out.push(b'\n');
    }
    out
}
