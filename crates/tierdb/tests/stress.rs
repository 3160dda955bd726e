//! High-concurrency checks for the sync layer on a multi-threaded runtime.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tierdb::prelude::*;
use tierdb_storage::{InMemoryMemoryStore, InMemoryRemoteStore, RemoteOp};

fn setup() -> (Arc<InMemoryRemoteStore>, Database) {
    let remote = Arc::new(InMemoryRemoteStore::new());
    let db = Database::builder()
        .memory(Arc::new(InMemoryMemoryStore::new()))
        .remote(remote.clone())
        .build()
        .unwrap();
    (remote, db)
}

/// Many tasks asking for the same document share one fetch
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_callers_one_fetch() {
    let (remote, db) = setup();
    remote.set_latency(Duration::from_millis(30));
    remote.seed(
        &DocId::new("users", "1"),
        json!({"name": "Ann"}).as_object().cloned().unwrap(),
    );

    let tasks = (0..100).map(|_| {
        let doc = db.collection("users").doc("1");
        tokio::spawn(async move { doc.snapshot().await })
    });
    let results = join_all(tasks).await;

    for result in results {
        assert!(result.unwrap().unwrap().exists());
    }
    assert_eq!(remote.calls(RemoteOp::Snapshot), 1);
    assert_eq!(db.sync().in_flight(), 0);
}

/// Distinct keys are fetched independently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_fetch_independently() {
    let (remote, db) = setup();
    remote.set_latency(Duration::from_millis(5));

    let tasks = (0..50).flat_map(|i| {
        (0..4).map(move |_| i).collect::<Vec<_>>()
    }).map(|i| {
        let doc = db.collection("users").doc(i.to_string());
        tokio::spawn(async move { doc.sync(SyncOptions::default()).await })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(remote.calls(RemoteOp::Snapshot), 50);
}

/// Concurrent writers on one collection all land in both tiers
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers() {
    let (remote, db) = setup();

    let tasks = (0..200).map(|i| {
        let doc = db.collection("items").doc(format!("{i:03}"));
        tokio::spawn(async move {
            let mut data = DocData::new();
            data.insert("n".into(), i.into());
            doc.set(data).await
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(remote.doc_count(), 200);
    let all = db
        .collection("items")
        .all()
        .snapshot(QuerySnapshotOptions::remote())
        .await
        .unwrap();
    assert_eq!(all.count(), 200);
    assert_eq!(all.ids().first().map(String::as_str), Some("000"));
}

/// Many live subscribers to one document share one publisher
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_live_subscribers() {
    let (_remote, db) = setup();
    let doc = db.collection("users").doc("1");

    let mut streams = Vec::new();
    for _ in 0..32 {
        streams.push(doc.on_snapshot().await.unwrap());
    }
    assert_eq!(db.snapshots().live_doc_count(), 1);

    let mut data = DocData::new();
    data.insert("v".into(), 1.into());
    doc.set(data).await.unwrap();

    for stream in &mut streams {
        // Skip anything published before the write
        loop {
            let snapshot = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .unwrap()
                .unwrap();
            if snapshot.get("v") == Some(&json!(1)) {
                break;
            }
        }
    }
}
