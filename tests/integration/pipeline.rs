//! Full diff → difference file → repair pipeline.
//!
//! A follower database is scanned against an in-memory leader, the
//! differences are encoded the way `mdsync diff` writes them and fed back to
//! the repair orchestrator, and the leader is checked afterwards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mdsync_diff::DiffConfig;
use mdsync_integration_tests::{
    InMemoryBlobs, InMemoryLeader, follower_db, metadata, run_diff, to_ndjson, versioned_metadata,
};
use mdsync_repair::{RepairConfig, RepairCounters, RepairRunner};
use mdsync_types::{DiffEntry, DiffKind};

const OLD: &str = "2020-06-01T00:00:00Z";
const RECENT: &str = "2022-06-01T00:00:00Z";
const VERSION_KEY: &str = "photos/g.jpg\0v1";

fn cutoff() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2021-01-09T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

struct Fixture {
    follower: Vec<(&'static str, String)>,
    leader: Arc<InMemoryLeader>,
    blobs: Arc<InMemoryBlobs>,
}

/// A follower and a leader disagreeing in every way the repair handles.
fn fixture() -> Fixture {
    let follower = vec![
        // Missing on the leader, blob gone: not repairable.
        ("docs/readme", metadata("blob-r", OLD)),
        ("photos/a.jpg", metadata("blob-a", OLD)),
        // Missing on the leader, readable: repaired from the follower.
        ("photos/b.jpg", metadata("blob-b", OLD)),
        // Only the follower's blob exists: repaired from the follower.
        ("photos/d.jpg", metadata("blob-d1", OLD)),
        // Neither blob exists: not repairable.
        ("photos/e.jpg", metadata("blob-e1", OLD)),
        // Modified after the cutoff.
        ("photos/f.jpg", metadata("blob-f", RECENT)),
        // Version missing on the leader along with its master.
        (VERSION_KEY, versioned_metadata("blob-g", "v1", OLD)),
    ];
    let leader = InMemoryLeader::with(&[
        ("photos/a.jpg", metadata("blob-a", OLD).as_str()),
        // Missing on the follower, readable: rewritten as is.
        ("photos/c.jpg", metadata("blob-c", OLD).as_str()),
        ("photos/d.jpg", metadata("blob-d2", OLD).as_str()),
        ("photos/e.jpg", metadata("blob-e2", OLD).as_str()),
    ]);
    let blobs = InMemoryBlobs::with(&["blob-a", "blob-b", "blob-c", "blob-d1", "blob-f", "blob-g"]);
    Fixture {
        follower,
        leader: Arc::new(leader),
        blobs: Arc::new(blobs),
    }
}

impl Fixture {
    fn follower_items(&self) -> Vec<(&str, &str)> {
        self.follower
            .iter()
            .map(|(key, value)| (*key, value.as_str()))
            .collect()
    }
}

fn summary(entries: &[DiffEntry]) -> Vec<(String, DiffKind)> {
    entries
        .iter()
        .map(|entry| (entry.key().to_string(), entry.kind()))
        .collect()
}

#[tokio::test]
async fn test_diff_finds_every_divergence() {
    for max_buffer_size in [1, 2, 3, 1000] {
        let fx = fixture();
        let db = follower_db(&fx.follower_items());
        let config = DiffConfig {
            max_buffer_size,
            ..DiffConfig::default()
        };

        let (entries, progress) = run_diff(db, fx.leader.clone(), config).await.unwrap();

        assert_eq!(
            summary(&entries),
            vec![
                ("docs/readme".to_string(), DiffKind::OnlyOnFollower),
                ("photos/b.jpg".to_string(), DiffKind::OnlyOnFollower),
                ("photos/c.jpg".to_string(), DiffKind::OnlyOnLeader),
                ("photos/d.jpg".to_string(), DiffKind::DifferingValue),
                ("photos/e.jpg".to_string(), DiffKind::DifferingValue),
                ("photos/f.jpg".to_string(), DiffKind::OnlyOnFollower),
                (VERSION_KEY.to_string(), DiffKind::OnlyOnFollower),
            ],
            "max_buffer_size={max_buffer_size}"
        );
        assert_eq!(progress.keys_scanned, 7);
        assert_eq!(progress.only_on_follower, 4);
        assert_eq!(progress.only_on_leader, 1);
        assert_eq!(progress.differing_value, 2);
    }
}

#[tokio::test]
async fn test_repair_applies_difference_file() {
    let fx = fixture();
    let db = follower_db(&fx.follower_items());
    let (entries, _) = run_diff(db, fx.leader.clone(), DiffConfig::default())
        .await
        .unwrap();
    let ndjson = to_ndjson(&entries);

    let runner = RepairRunner::new(
        fx.leader.clone(),
        fx.blobs.clone(),
        RepairConfig {
            older_than: Some(cutoff()),
        },
    );
    let counters = runner.run(ndjson.as_slice()).await.unwrap();

    assert_eq!(
        counters,
        RepairCounters {
            auto_repair: 4,
            not_repairable: 2,
            too_recent: 1,
            ..RepairCounters::default()
        }
    );

    let follower_value = |key: &str| {
        fx.follower
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value.clone())
    };
    assert_eq!(fx.leader.value("photos/b.jpg"), follower_value("photos/b.jpg"));
    assert_eq!(fx.leader.value("photos/d.jpg"), follower_value("photos/d.jpg"));
    assert_eq!(fx.leader.value(VERSION_KEY), follower_value(VERSION_KEY));
    // The absent master is mirrored from the repaired version.
    assert_eq!(fx.leader.value("photos/g.jpg"), follower_value(VERSION_KEY));
    // Unrepaired keys are untouched.
    assert_eq!(fx.leader.value("photos/e.jpg"), Some(metadata("blob-e2", OLD)));
    assert_eq!(fx.leader.value("photos/f.jpg"), None);
    assert_eq!(fx.leader.value("docs/readme"), None);
}

#[tokio::test]
async fn test_rescan_after_repair_reports_leftovers_only() {
    let fx = fixture();
    let (entries, _) = run_diff(
        follower_db(&fx.follower_items()),
        fx.leader.clone(),
        DiffConfig::default(),
    )
    .await
    .unwrap();
    let runner = RepairRunner::new(
        fx.leader.clone(),
        fx.blobs.clone(),
        RepairConfig {
            older_than: Some(cutoff()),
        },
    );
    runner.run(to_ndjson(&entries).as_slice()).await.unwrap();

    let (entries, progress) = run_diff(
        follower_db(&fx.follower_items()),
        fx.leader.clone(),
        DiffConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        summary(&entries),
        vec![
            ("docs/readme".to_string(), DiffKind::OnlyOnFollower),
            ("photos/c.jpg".to_string(), DiffKind::OnlyOnLeader),
            ("photos/e.jpg".to_string(), DiffKind::DifferingValue),
            ("photos/f.jpg".to_string(), DiffKind::OnlyOnFollower),
            // The follower never had the master key.
            ("photos/g.jpg".to_string(), DiffKind::OnlyOnLeader),
        ]
    );
    assert_eq!(progress.differences(), 5);
}

#[tokio::test]
async fn test_repair_of_empty_difference_file() {
    let fx = fixture();
    let runner = RepairRunner::new(fx.leader.clone(), fx.blobs.clone(), RepairConfig::default());
    let counters = runner.run(&b"\n\n"[..]).await.unwrap();
    assert_eq!(counters, RepairCounters::default());
}
