//! Snapshot coordinator
//!
//! The read path. Point-in-time reads sync through [`SyncCoordinator`]
//! first and then read memory; live reads follow the memory tier's change
//! feed.
//!
//! Live document streams are shared per canonical key: the first
//! subscriber starts one publishing task backed by a `watch` channel, and
//! later subscribers attach to the same channel and immediately see its
//! latest snapshot. The task exits once every subscriber is gone.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, watch};
use tracing::{debug, instrument, trace};

use tierdb_core::{
    CanonicalKey, DocId, DocSnapshot, MemoryChange, MemoryStore, Predicate, QueryId,
    QuerySnapshot, Trackable,
};

use crate::config::QuerySource;
use crate::error::Result;
use crate::stream::{DocSnapshotStream, QuerySnapshotStream, watch_to_stream};
use crate::sync::{SyncCoordinator, SyncOptions};

type LiveDocs = DashMap<CanonicalKey, watch::Sender<Option<DocSnapshot>>>;

/// Options for [`SnapshotCoordinator::query_snapshot`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuerySnapshotOptions {
    /// Where to read from; the database default when unset
    pub source: Option<QuerySource>,
    /// Re-run the query remotely even if its result is cached
    pub force: bool,
}

impl QuerySnapshotOptions {
    /// Evaluate against memory only.
    pub fn memory() -> Self {
        Self {
            source: Some(QuerySource::Memory),
            force: false,
        }
    }

    /// Resolve ids through remote.
    pub fn remote() -> Self {
        Self {
            source: Some(QuerySource::Remote),
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Serves document and query snapshots.
#[derive(Clone)]
pub struct SnapshotCoordinator {
    memory: Arc<dyn MemoryStore>,
    sync: SyncCoordinator,
    default_source: QuerySource,
    live_docs: Arc<LiveDocs>,
}

impl std::fmt::Debug for SnapshotCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCoordinator")
            .field("default_source", &self.default_source)
            .field("live_docs", &self.live_docs.len())
            .finish_non_exhaustive()
    }
}

impl SnapshotCoordinator {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        sync: SyncCoordinator,
        default_source: QuerySource,
    ) -> Self {
        Self {
            memory,
            sync,
            default_source,
            live_docs: Arc::new(DashMap::new()),
        }
    }

    /// Read-through snapshot of a document.
    pub async fn doc_snapshot(&self, id: &DocId) -> Result<DocSnapshot> {
        self.doc_snapshot_with(id, SyncOptions::default()).await
    }

    /// Snapshot of a document, syncing with explicit options first.
    #[instrument(skip(self, id, options), fields(key = %id))]
    pub async fn doc_snapshot_with(&self, id: &DocId, options: SyncOptions) -> Result<DocSnapshot> {
        self.sync.sync_doc(id, options).await?;
        Ok(self.memory.snapshot(id))
    }

    /// Live stream of a document's snapshots.
    ///
    /// The first item is the current snapshot. Fails if the initial sync
    /// fails; no stream is attached in that case.
    #[instrument(skip(self, id), fields(key = %id))]
    pub async fn doc_on_snapshot(&self, id: &DocId) -> Result<DocSnapshotStream> {
        self.sync.sync_doc(id, SyncOptions::default()).await?;
        Ok(watch_to_stream(self.live_doc(id)))
    }

    /// Number of documents with at least one live stream.
    pub fn live_doc_count(&self) -> usize {
        self.live_docs.len()
    }

    fn live_doc(&self, id: &DocId) -> watch::Receiver<Option<DocSnapshot>> {
        let key = id.canonical_key();
        match self.live_docs.entry(key) {
            Entry::Occupied(entry) => {
                trace!(key = %entry.key(), "Attaching to live document stream");
                entry.get().subscribe()
            }
            Entry::Vacant(entry) => {
                debug!(key = %entry.key(), "Starting live document stream");
                let changes = self.memory.subscribe();
                let (tx, rx) = watch::channel(Some(self.memory.snapshot(id)));
                entry.insert(tx.clone());
                tokio::spawn(publish_doc(
                    self.memory.clone(),
                    self.live_docs.clone(),
                    id.clone(),
                    changes,
                    tx,
                ));
                rx
            }
        }
    }

    /// Point-in-time query result.
    ///
    /// With [`QuerySource::Memory`] the predicate is evaluated against
    /// memory. With [`QuerySource::Remote`] the remote decides which ids
    /// match and the documents are read from memory in memory's order.
    #[instrument(skip(self, query, options), fields(key = %query))]
    pub async fn query_snapshot(
        &self,
        query: &QueryId,
        options: QuerySnapshotOptions,
    ) -> Result<QuerySnapshot> {
        match options.source.unwrap_or(self.default_source) {
            QuerySource::Memory => Ok(self
                .memory
                .query(query.collection_id(), query.predicate())),
            QuerySource::Remote => {
                let sync_options = SyncOptions {
                    force: options.force,
                    remove_from_memory: false,
                };
                let ids = self.sync.sync_query(query, sync_options).await?;
                Ok(self
                    .memory
                    .query(query.collection_id(), &Predicate::all())
                    .retain_ids(&ids))
            }
        }
    }

    /// Live stream of a query evaluated against memory.
    ///
    /// Re-evaluated whenever the query's collection changes; the remote
    /// tier is never contacted.
    pub fn query_on_snapshot(&self, query: &QueryId) -> QuerySnapshotStream {
        let memory = self.memory.clone();
        let query = query.clone();
        let mut changes = memory.subscribe();

        Box::pin(async_stream::stream! {
            let mut last = memory.query(query.collection_id(), query.predicate());
            yield last.clone();

            loop {
                let relevant = match changes.recv().await {
                    Ok(change) => change.affects_collection(query.collection_id()),
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !relevant {
                    continue;
                }

                let next = memory.query(query.collection_id(), query.predicate());
                if next != last {
                    last = next.clone();
                    yield next;
                }
            }
        })
    }
}

/// Republish a document's snapshot on every memory change that touches it,
/// until no subscriber is left.
async fn publish_doc(
    memory: Arc<dyn MemoryStore>,
    live_docs: Arc<LiveDocs>,
    id: DocId,
    mut changes: broadcast::Receiver<MemoryChange>,
    tx: watch::Sender<Option<DocSnapshot>>,
) {
    let key = id.canonical_key();
    loop {
        tokio::select! {
            _ = tx.closed() => {
                // A subscriber may have attached since closed() resolved
                if live_docs
                    .remove_if(&key, |_, sender| sender.receiver_count() == 0)
                    .is_some()
                {
                    debug!(%key, "Live document stream has no subscribers, stopping");
                    break;
                }
            }
            change = changes.recv() => {
                let relevant = match change {
                    Ok(change) => change.affects_doc(&id),
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => {
                        live_docs.remove(&key);
                        break;
                    }
                };
                if relevant {
                    let snapshot = Some(memory.snapshot(&id));
                    tx.send_if_modified(|current| {
                        if *current == snapshot {
                            return false;
                        }
                        *current = snapshot;
                        true
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use crate::error::DatabaseError;
    use tierdb_core::{DocData, StoreError};
    use tierdb_storage::{InMemoryMemoryStore, InMemoryRemoteStore, RemoteOp};

    fn data(value: Value) -> DocData {
        value.as_object().cloned().unwrap()
    }

    fn setup() -> (
        Arc<InMemoryMemoryStore>,
        Arc<InMemoryRemoteStore>,
        SnapshotCoordinator,
    ) {
        let memory = Arc::new(InMemoryMemoryStore::new());
        let remote = Arc::new(InMemoryRemoteStore::new());
        let sync = SyncCoordinator::new(memory.clone(), remote.clone());
        let snapshots = SnapshotCoordinator::new(memory.clone(), sync, QuerySource::Remote);
        (memory, remote, snapshots)
    }

    #[tokio::test]
    async fn test_doc_snapshot_reads_through_once() {
        let (_memory, remote, snapshots) = setup();
        let id = DocId::new("users", "1");
        remote.seed(&id, data(json!({"name": "Ann"})));

        let first = snapshots.doc_snapshot(&id).await.unwrap();
        let second = snapshots.doc_snapshot(&id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.get("name"), Some(&json!("Ann")));
        assert_eq!(remote.calls(RemoteOp::Snapshot), 1);
    }

    #[tokio::test]
    async fn test_absent_doc_snapshot() {
        let (_memory, _remote, snapshots) = setup();
        let snapshot = snapshots.doc_snapshot(&DocId::new("users", "1")).await.unwrap();
        assert!(!snapshot.exists());
        assert_eq!(snapshot.id(), "1");
    }

    #[tokio::test]
    async fn test_doc_on_snapshot_follows_memory() {
        let (memory, remote, snapshots) = setup();
        let id = DocId::new("users", "1");
        remote.seed(&id, data(json!({"v": 1})));

        let mut stream = snapshots.doc_on_snapshot(&id).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.get("v"), Some(&json!(1)));

        memory.set(&DocId::new("users", "2"), DocData::new()).unwrap();
        memory.set(&id, data(json!({"v": 2}))).unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(second.get("v"), Some(&json!(2)));

        memory.remove(&id).unwrap();
        assert!(!stream.next().await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_doc_streams_share_one_publisher() {
        let (memory, _remote, snapshots) = setup();
        let id = DocId::new("users", "1");

        let mut a = snapshots.doc_on_snapshot(&id).await.unwrap();
        memory.set(&id, data(json!({"v": 1}))).unwrap();
        assert_eq!(a.next().await.unwrap().get("v"), None);
        assert_eq!(a.next().await.unwrap().get("v"), Some(&json!(1)));

        // A late subscriber gets the latest value straight away
        let mut b = snapshots.doc_on_snapshot(&id).await.unwrap();
        assert_eq!(b.next().await.unwrap().get("v"), Some(&json!(1)));
        assert_eq!(snapshots.live_doc_count(), 1);
        assert_eq!(memory.subscriber_count(), 1);

        drop(a);
        drop(b);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(snapshots.live_doc_count(), 0);
        assert_eq!(memory.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_doc_on_snapshot_reports_offline_remote() {
        let (_memory, remote, snapshots) = setup();
        let id = DocId::new("users", "1");
        remote.set_offline(true);

        let result = snapshots.doc_on_snapshot(&id).await;
        assert!(matches!(
            result,
            Err(DatabaseError::Store(StoreError::Unavailable(_)))
        ));
        assert_eq!(snapshots.live_doc_count(), 0);

        remote.set_offline(false);
        let mut stream = snapshots.doc_on_snapshot(&id).await.unwrap();
        assert!(!stream.next().await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_query_snapshot_sources() {
        let (memory, remote, snapshots) = setup();
        remote.seed(&DocId::new("users", "a"), data(json!({"age": 20})));
        remote.seed(&DocId::new("users", "b"), data(json!({"age": 40})));
        memory.set(&DocId::new("users", "c"), data(json!({"age": 50}))).unwrap();
        let query = QueryId::new("users", Predicate::all().gte("age", 30));

        let local = snapshots
            .query_snapshot(&query, QuerySnapshotOptions::memory())
            .await
            .unwrap();
        assert_eq!(local.ids(), vec!["c".to_string()]);
        assert_eq!(remote.calls(RemoteOp::Query), 0);

        let remote_result = snapshots
            .query_snapshot(&query, QuerySnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(remote_result.ids(), vec!["b".to_string()]);
        assert_eq!(remote.calls(RemoteOp::Query), 1);
    }

    #[tokio::test]
    async fn test_query_on_snapshot_reevaluates() {
        let (memory, _remote, snapshots) = setup();
        let query = QueryId::new("users", Predicate::all().eq("active", true));

        let mut stream = snapshots.query_on_snapshot(&query);
        assert!(stream.next().await.unwrap().is_empty());

        // Non-matching writes do not produce a new snapshot
        memory.set(&DocId::new("users", "1"), data(json!({"active": false}))).unwrap();
        memory.set(&DocId::new("posts", "1"), data(json!({"active": true}))).unwrap();
        memory.set(&DocId::new("users", "2"), data(json!({"active": true}))).unwrap();

        let next = stream.next().await.unwrap();
        assert_eq!(next.ids(), vec!["2".to_string()]);
    }
}
