//! In-process remote tier
//!
//! [`InMemoryRemoteStore`] behaves like a local replica of a replicated
//! database: writes land in the replica and are queued in an outbox, and
//! [`RemoteStore::sync_with_server`] pushes the outbox to an
//! [`InMemoryServer`] and then pulls the server's state, which replaces the
//! replica. Without a server, syncing is a no-op.
//!
//! The store is instrumented for tests: every call is counted per
//! [`RemoteOp`], and latency, an offline switch, and one-shot failures can
//! be injected.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tierdb_core::{
    DocData, DocId, DocSnapshot, QueryId, QuerySnapshot, RemoteStore, StoreError, Trackable,
    shallow_merge,
};
use tracing::{debug, info, trace};

type Collections = BTreeMap<String, BTreeMap<String, DocData>>;

/// Remote operations, for call accounting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Snapshot,
    Set,
    Update,
    Remove,
    Exists,
    Query,
    SyncWithServer,
    RemoveAllData,
}

/// Authoritative server a replica reconciles with
#[derive(Debug, Default)]
pub struct InMemoryServer {
    collections: Mutex<Collections>,
}

impl InMemoryServer {
    /// Create an empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a document directly on the server, as another client would
    pub fn set(&self, id: &DocId, data: DocData) {
        self.collections
            .lock()
            .entry(id.collection_id().to_string())
            .or_default()
            .insert(id.doc_id().to_string(), data);
    }

    /// Remove a document directly on the server
    pub fn remove(&self, id: &DocId) {
        if let Some(docs) = self.collections.lock().get_mut(id.collection_id()) {
            docs.remove(id.doc_id());
        }
    }

    /// Read a document from the server
    pub fn get(&self, id: &DocId) -> Option<DocData> {
        self.collections
            .lock()
            .get(id.collection_id())
            .and_then(|docs| docs.get(id.doc_id()).cloned())
    }

    /// Number of documents held by the server
    pub fn doc_count(&self) -> usize {
        self.collections.lock().values().map(BTreeMap::len).sum()
    }

    fn apply(&self, change: ReplicaChange) {
        match change {
            ReplicaChange::Put(id, data) => self.set(&id, data),
            ReplicaChange::Delete(id) => self.remove(&id),
        }
    }

    fn dump(&self) -> Collections {
        self.collections.lock().clone()
    }
}

/// A replica write waiting to be pushed to the server
#[derive(Debug, Clone)]
enum ReplicaChange {
    Put(DocId, DocData),
    Delete(DocId),
}

/// In-memory implementation of RemoteStore
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    /// Local replica
    replica: Mutex<Collections>,
    /// Writes not yet pushed to the server
    outbox: Mutex<Vec<ReplicaChange>>,
    /// Server this replica reconciles with
    server: Option<Arc<InMemoryServer>>,
    /// Call counts per operation
    calls: DashMap<RemoteOp, usize>,
    /// One-shot failures per operation
    failures: DashMap<RemoteOp, StoreError>,
    /// Simulated latency per call, in milliseconds
    latency_ms: AtomicU64,
    /// When set, every call fails with `Unavailable`
    offline: AtomicBool,
}

impl InMemoryRemoteStore {
    /// Create a standalone remote store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a replica of `server`
    pub fn with_server(server: Arc<InMemoryServer>) -> Self {
        Self {
            server: Some(server),
            ..Self::default()
        }
    }

    /// Add simulated latency to every call
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Take the store offline or bring it back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: RemoteOp, error: StoreError) {
        self.failures.insert(op, error);
    }

    /// Number of calls of `op` so far
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.calls.get(&op).map(|count| *count).unwrap_or(0)
    }

    /// Write into the replica without counting a call or touching the outbox
    pub fn seed(&self, id: &DocId, data: DocData) {
        self.replica
            .lock()
            .entry(id.collection_id().to_string())
            .or_default()
            .insert(id.doc_id().to_string(), data);
    }

    /// Read the replica without counting a call
    pub fn peek(&self, id: &DocId) -> Option<DocData> {
        self.replica
            .lock()
            .get(id.collection_id())
            .and_then(|docs| docs.get(id.doc_id()).cloned())
    }

    /// Number of documents in the replica
    pub fn doc_count(&self) -> usize {
        self.replica.lock().values().map(BTreeMap::len).sum()
    }

    /// Count the call, wait out the latency, then apply injected failures
    async fn begin(&self, op: RemoteOp) -> Result<(), StoreError> {
        *self.calls.entry(op).or_insert(0) += 1;

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("remote store is offline"));
        }
        if let Some((_, error)) = self.failures.remove(&op) {
            return Err(error);
        }
        Ok(())
    }

    fn record(&self, change: ReplicaChange) {
        if self.server.is_some() {
            self.outbox.lock().push(change);
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn snapshot(&self, id: &DocId) -> Result<DocSnapshot, StoreError> {
        self.begin(RemoteOp::Snapshot).await?;
        trace!(key = %id, "Remote snapshot");
        Ok(DocSnapshot::new(id.doc_id(), self.peek(id)))
    }

    async fn set(&self, id: &DocId, data: DocData) -> Result<(), StoreError> {
        self.begin(RemoteOp::Set).await?;
        trace!(key = %id, "Remote set");
        self.seed(id, data.clone());
        self.record(ReplicaChange::Put(id.clone(), data));
        Ok(())
    }

    async fn update(&self, id: &DocId, partial: DocData) -> Result<(), StoreError> {
        self.begin(RemoteOp::Update).await?;
        trace!(key = %id, "Remote update");
        let merged = {
            let mut replica = self.replica.lock();
            let doc = replica
                .get_mut(id.collection_id())
                .and_then(|docs| docs.get_mut(id.doc_id()))
                .ok_or_else(|| StoreError::not_found(id.to_string()))?;
            shallow_merge(doc, partial);
            doc.clone()
        };
        self.record(ReplicaChange::Put(id.clone(), merged));
        Ok(())
    }

    async fn remove(&self, id: &DocId) -> Result<(), StoreError> {
        self.begin(RemoteOp::Remove).await?;
        trace!(key = %id, "Remote remove");
        let removed = self
            .replica
            .lock()
            .get_mut(id.collection_id())
            .and_then(|docs| docs.remove(id.doc_id()));
        if removed.is_none() {
            return Err(StoreError::not_found(id.to_string()));
        }
        self.record(ReplicaChange::Delete(id.clone()));
        Ok(())
    }

    async fn exists(&self, id: &DocId) -> Result<bool, StoreError> {
        self.begin(RemoteOp::Exists).await?;
        Ok(self.peek(id).is_some())
    }

    async fn query(&self, query: &QueryId) -> Result<QuerySnapshot, StoreError> {
        self.begin(RemoteOp::Query).await?;
        trace!(key = %query.canonical_key(), "Remote query");
        let replica = self.replica.lock();
        let result = match replica.get(query.collection_id()) {
            Some(docs) => docs
                .iter()
                .filter(|(_, data)| query.predicate().matches(data))
                .map(|(doc_id, data)| DocSnapshot::present(doc_id.clone(), data.clone()))
                .collect(),
            None => QuerySnapshot::default(),
        };
        Ok(result)
    }

    async fn sync_with_server(&self) -> Result<(), StoreError> {
        self.begin(RemoteOp::SyncWithServer).await?;
        let Some(server) = &self.server else {
            debug!("No server configured, nothing to reconcile");
            return Ok(());
        };

        let pending: Vec<ReplicaChange> = std::mem::take(&mut *self.outbox.lock());
        let pushed = pending.len();
        for change in pending {
            server.apply(change);
        }

        let state = server.dump();
        let pulled: usize = state.values().map(BTreeMap::len).sum();
        *self.replica.lock() = state;

        info!(pushed, pulled, "Replica reconciled with server");
        Ok(())
    }

    async fn remove_all_data(&self) -> Result<(), StoreError> {
        self.begin(RemoteOp::RemoveAllData).await?;
        self.replica.lock().clear();
        self.outbox.lock().clear();
        debug!("Cleared replica");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tierdb_core::Predicate;

    fn data(value: Value) -> DocData {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_missing_doc_is_absent_snapshot() {
        let store = InMemoryRemoteStore::new();
        let snapshot = store.snapshot(&DocId::new("users", "1")).await.unwrap();
        assert!(!snapshot.exists());
        assert_eq!(store.calls(RemoteOp::Snapshot), 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing_doc() {
        let store = InMemoryRemoteStore::new();
        let id = DocId::new("users", "1");

        let err = store.update(&id, data(json!({"a": 1}))).await.unwrap_err();
        assert!(err.is_not_found());

        store.set(&id, data(json!({"a": 1, "b": 2}))).await.unwrap();
        store.update(&id, data(json!({"b": 3}))).await.unwrap();
        assert_eq!(store.peek(&id), Some(data(json!({"a": 1, "b": 3}))));
    }

    #[tokio::test]
    async fn test_remove_missing_doc_is_not_found() {
        let store = InMemoryRemoteStore::new();
        let err = store.remove(&DocId::new("users", "1")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_query_and_exists() {
        let store = InMemoryRemoteStore::new();
        store.seed(&DocId::new("users", "1"), data(json!({"age": 10})));
        store.seed(&DocId::new("users", "2"), data(json!({"age": 30})));

        let result = store
            .query(&QueryId::new("users", Predicate::all().gt("age", 18)))
            .await
            .unwrap();
        assert_eq!(result.ids(), vec!["2"]);
        assert!(store.exists(&DocId::new("users", "1")).await.unwrap());
        assert!(!store.exists(&DocId::new("users", "3")).await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_and_injected_failures() {
        let store = InMemoryRemoteStore::new();
        let id = DocId::new("users", "1");

        store.set_offline(true);
        assert!(matches!(
            store.snapshot(&id).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);

        store.fail_next(RemoteOp::Set, StoreError::io("disk full"));
        assert!(matches!(
            store.set(&id, DocData::new()).await,
            Err(StoreError::Io(_))
        ));
        // One-shot
        store.set(&id, DocData::new()).await.unwrap();
        assert_eq!(store.calls(RemoteOp::Set), 2);
    }

    #[tokio::test]
    async fn test_sync_pushes_outbox_then_pulls_server_state() {
        let server = Arc::new(InMemoryServer::new());
        let store = InMemoryRemoteStore::with_server(server.clone());

        let local = DocId::new("users", "local");
        let foreign = DocId::new("users", "foreign");
        let stale = DocId::new("users", "stale");

        store.set(&local, data(json!({"n": 1}))).await.unwrap();
        store.seed(&stale, data(json!({"n": 0})));
        server.set(&foreign, data(json!({"n": 2})));

        store.sync_with_server().await.unwrap();

        assert_eq!(server.get(&local), Some(data(json!({"n": 1}))));
        assert_eq!(store.peek(&foreign), Some(data(json!({"n": 2}))));
        // Seeded only locally, never pushed: the server does not know it
        assert_eq!(store.peek(&stale), None);
        assert_eq!(store.doc_count(), 2);
    }

    #[tokio::test]
    async fn test_sync_without_server_is_noop() {
        let store = InMemoryRemoteStore::new();
        store.seed(&DocId::new("users", "1"), DocData::new());
        store.sync_with_server().await.unwrap();
        assert_eq!(store.doc_count(), 1);
    }
}
