//! Sync coordinator
//!
//! Owns the "has this identifier been freshly loaded?" state. Fetches run
//! as spawned tasks and are shared between every caller asking for the same
//! canonical key, so at most one remote fetch per key is in flight and a
//! started fetch always runs to completion.
//!
//! ## Bookkeeping
//!
//! - Sync records: doc keys loaded since the last full invalidation.
//! - Query cache: `collection -> query key -> doc ids`, dropped per
//!   collection after writes.
//! - Session queries: every query synced this session, replayed by
//!   [`SyncCoordinator::sync_with_server`]. Never invalidated.
//!
//! A fetch that completes after an invalidation it raced with still hands
//! its result to the callers, but does not record it. A document sync is
//! never satisfied by joining such a fetch, nor by one that would not evict
//! when eviction was asked for; it queues behind it instead.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use tierdb_core::{
    CanonicalKey, DocId, MemoryStore, Predicate, QueryId, RemoteStore, Trackable,
};

use crate::error::{DatabaseError, Result};

type SharedSync<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Options for [`SyncCoordinator::sync_doc`] and
/// [`SyncCoordinator::sync_query`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Fetch even if the target is known-synced or cached
    pub force: bool,
    /// Delete the memory copy of a document the remote no longer has
    pub remove_from_memory: bool,
}

impl SyncOptions {
    /// Bypass sync records and cached results.
    pub fn forced() -> Self {
        Self {
            force: true,
            remove_from_memory: false,
        }
    }

    /// Re-fetch and evict documents the remote no longer has.
    pub fn refresh() -> Self {
        Self {
            force: true,
            remove_from_memory: true,
        }
    }
}

/// Cached query results, scoped per collection
#[derive(Debug, Default)]
struct QueryCache {
    results: HashMap<String, HashMap<CanonicalKey, Vec<String>>>,
    /// Bumped whenever a collection's entries are dropped
    generations: HashMap<String, u64>,
}

impl QueryCache {
    fn get(&self, query: &QueryId, key: &CanonicalKey) -> Option<Vec<String>> {
        self.results.get(query.collection_id())?.get(key).cloned()
    }

    fn insert(&mut self, query: &QueryId, key: CanonicalKey, ids: Vec<String>) {
        self.results
            .entry(query.collection_id().to_string())
            .or_default()
            .insert(key, ids);
    }

    fn generation(&self, collection_id: &str) -> u64 {
        self.generations.get(collection_id).copied().unwrap_or(0)
    }

    fn invalidate_collection(&mut self, collection_id: &str) -> usize {
        *self.generations.entry(collection_id.to_string()).or_insert(0) += 1;
        self.results
            .remove(collection_id)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    fn clear(&mut self) {
        self.results.clear();
    }
}

/// A document fetch other callers may join
struct DocFetch {
    seq: u64,
    epoch: u64,
    evicts: bool,
    pending: SharedSync<()>,
}

impl DocFetch {
    /// Whether joining this fetch satisfies a sync with `options` at `epoch`
    fn covers(&self, options: SyncOptions, epoch: u64) -> bool {
        self.epoch == epoch && (self.evicts || !options.remove_from_memory)
    }
}

#[derive(Default)]
struct SyncState {
    /// Bumped by every full invalidation
    epoch: u64,
    /// Source of [`DocFetch::seq`]
    next_fetch: u64,
    synced: HashSet<CanonicalKey>,
    docs_in_flight: HashMap<CanonicalKey, DocFetch>,
    queries_in_flight: HashMap<CanonicalKey, SharedSync<Vec<String>>>,
    query_cache: QueryCache,
    session_queries: HashMap<CanonicalKey, QueryId>,
}

struct SyncInner {
    memory: Arc<dyn MemoryStore>,
    remote: Arc<dyn RemoteStore>,
    state: Mutex<SyncState>,
}

/// Tracks freshness and drives remote-to-memory fetches.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<SyncInner>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SyncCoordinator")
            .field("epoch", &state.epoch)
            .field("synced", &state.synced.len())
            .field("docs_in_flight", &state.docs_in_flight.len())
            .field("queries_in_flight", &state.queries_in_flight.len())
            .field("session_queries", &state.session_queries.len())
            .finish()
    }
}

impl SyncCoordinator {
    pub fn new(memory: Arc<dyn MemoryStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                memory,
                remote,
                state: Mutex::new(SyncState::default()),
            }),
        }
    }

    /// Load a document from remote into memory.
    ///
    /// Skipped when the document is known-synced or already in memory,
    /// unless `options.force` is set. A document the remote does not have
    /// is a successful sync: memory is left alone, or cleared when
    /// `options.remove_from_memory` is set.
    #[instrument(skip(self, id, options), fields(key = %id))]
    pub async fn sync_doc(&self, id: &DocId, options: SyncOptions) -> Result<()> {
        let key = id.canonical_key();
        let pending = {
            let mut state = self.inner.state.lock();
            if !options.force {
                if state.synced.contains(&key) {
                    debug!("Document already synced");
                    return Ok(());
                }
                if self.inner.memory.exists(id) {
                    debug!("Document already in memory");
                    state.synced.insert(key);
                    return Ok(());
                }
            }

            let epoch = state.epoch;
            let in_flight = state
                .docs_in_flight
                .get(&key)
                .map(|fetch| (fetch.covers(options, epoch), fetch.pending.clone()));
            match in_flight {
                Some((true, pending)) => {
                    debug!("Joining in-flight document sync");
                    pending
                }
                in_flight => {
                    // A stale or non-evicting fetch runs first, then ours
                    let previous = in_flight.map(|(_, pending)| pending);
                    if previous.is_some() {
                        debug!("Queueing behind an outdated document sync");
                    }
                    let seq = state.next_fetch;
                    state.next_fetch += 1;
                    let this = self.clone();
                    let id = id.clone();
                    let pending = spawn_shared(async move {
                        if let Some(previous) = previous {
                            let _ = previous.await;
                        }
                        this.fetch_doc(id, options, epoch, seq).await
                    });
                    state.docs_in_flight.insert(
                        key,
                        DocFetch {
                            seq,
                            epoch,
                            evicts: options.remove_from_memory,
                            pending: pending.clone(),
                        },
                    );
                    pending
                }
            }
        };
        pending.await
    }

    async fn fetch_doc(self, id: DocId, options: SyncOptions, epoch: u64, seq: u64) -> Result<()> {
        let result = self.load_doc(&id, options).await;

        let key = id.canonical_key();
        let mut state = self.inner.state.lock();
        if state
            .docs_in_flight
            .get(&key)
            .is_some_and(|fetch| fetch.seq == seq)
        {
            state.docs_in_flight.remove(&key);
        }
        if result.is_ok() {
            if state.epoch == epoch {
                trace!(%key, "Marked synced");
                state.synced.insert(key);
            } else {
                trace!(%key, "Invalidated while in flight, not marking synced");
            }
        }
        result
    }

    async fn load_doc(&self, id: &DocId, options: SyncOptions) -> Result<()> {
        let data = match self.inner.remote.snapshot(id).await {
            Ok(snapshot) => snapshot.into_data(),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        match data {
            Some(data) => self.inner.memory.set(id, data)?,
            None => {
                warn!(key = %id, "Document does not exist remotely");
                if options.remove_from_memory {
                    self.inner.memory.remove(id)?;
                }
            }
        }
        Ok(())
    }

    /// Run a query against remote, write every result into memory, and
    /// return the matched ids in result order.
    ///
    /// Returns the cached ids when present, unless `options.force` is set.
    #[instrument(skip(self, query, options), fields(key = %query))]
    pub async fn sync_query(&self, query: &QueryId, options: SyncOptions) -> Result<Vec<String>> {
        let key = query.canonical_key();
        let pending = {
            let mut state = self.inner.state.lock();
            if !options.force
                && let Some(ids) = state.query_cache.get(query, &key)
            {
                debug!(count = ids.len(), "Query cache hit");
                return Ok(ids);
            }

            if let Some(pending) = state.queries_in_flight.get(&key) {
                debug!("Joining in-flight query sync");
                pending.clone()
            } else {
                let epoch = state.epoch;
                let generation = state.query_cache.generation(query.collection_id());
                let pending =
                    spawn_shared(self.clone().fetch_query(query.clone(), epoch, generation));
                state.queries_in_flight.insert(key, pending.clone());
                pending
            }
        };
        pending.await
    }

    async fn fetch_query(self, query: QueryId, epoch: u64, generation: u64) -> Result<Vec<String>> {
        let result = self.load_query(&query).await;

        let key = query.canonical_key();
        let mut state = self.inner.state.lock();
        state.queries_in_flight.remove(&key);
        if let Ok(ids) = &result {
            state.session_queries.insert(key.clone(), query.clone());
            let current = state.query_cache.generation(query.collection_id());
            if state.epoch == epoch && current == generation {
                trace!(%key, count = ids.len(), "Cached query result");
                state.query_cache.insert(&query, key, ids.clone());
            } else {
                trace!(%key, "Collection invalidated while in flight, not caching");
            }
        }
        result
    }

    async fn load_query(&self, query: &QueryId) -> Result<Vec<String>> {
        let snapshot = match self.inner.remote.query(query).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::with_capacity(snapshot.count());
        for doc in snapshot {
            let id = DocId::new(query.collection_id(), doc.id());
            ids.push(doc.id().to_string());
            if let Some(data) = doc.into_data() {
                self.inner.memory.set(&id, data)?;
            }
        }
        Ok(ids)
    }

    /// Drop every cached query result for `collection_id`.
    ///
    /// Document sync records are kept.
    pub fn invalidate_query_cache_for_collection(&self, collection_id: &str) {
        let dropped = self
            .inner
            .state
            .lock()
            .query_cache
            .invalidate_collection(collection_id);
        trace!(collection_id, dropped, "Invalidated query cache");
    }

    /// Clear all sync records and query caches.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        state.synced.clear();
        state.query_cache.clear();
        debug!(epoch = state.epoch, "Invalidated sync state");
    }

    /// Drop the sync record of one document.
    pub(crate) fn forget(&self, id: &DocId) {
        self.inner.state.lock().synced.remove(&id.canonical_key());
    }

    /// Invalidate, and forget the session's queries.
    pub(crate) fn reset(&self) {
        self.invalidate();
        self.inner.state.lock().session_queries.clear();
    }

    /// Reconcile remote with its server, then refresh everything held
    /// locally.
    ///
    /// Every document in memory is re-fetched (and evicted if the server
    /// dropped it) before every session query is replayed.
    #[instrument(skip(self))]
    pub async fn sync_with_server(&self) -> Result<()> {
        info!("Reconciling remote store with server");
        self.inner.remote.sync_with_server().await?;

        self.invalidate();

        let memory = &self.inner.memory;
        let docs: Vec<DocId> = memory
            .collections()
            .into_iter()
            .flat_map(|collection_id| {
                memory
                    .query(&collection_id, &Predicate::all())
                    .into_iter()
                    .map(|doc| DocId::new(collection_id.clone(), doc.id()))
                    .collect::<Vec<_>>()
            })
            .collect();
        info!(count = docs.len(), "Refreshing documents held in memory");
        try_join_all(
            docs.iter()
                .map(|id| self.sync_doc(id, SyncOptions::refresh())),
        )
        .await?;

        let queries: Vec<QueryId> = self
            .inner
            .state
            .lock()
            .session_queries
            .values()
            .cloned()
            .collect();
        info!(count = queries.len(), "Replaying session queries");
        try_join_all(
            queries
                .iter()
                .map(|query| self.sync_query(query, SyncOptions::forced())),
        )
        .await?;

        Ok(())
    }

    /// Whether `id` has been loaded since the last invalidation.
    pub fn is_synced(&self, id: &impl Trackable) -> bool {
        self.inner.state.lock().synced.contains(&id.canonical_key())
    }

    /// Whether a result for `query` is cached.
    pub fn is_query_cached(&self, query: &QueryId) -> bool {
        let key = query.canonical_key();
        self.inner.state.lock().query_cache.get(query, &key).is_some()
    }

    /// Number of distinct queries synced this session.
    pub fn session_query_count(&self) -> usize {
        self.inner.state.lock().session_queries.len()
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        let state = self.inner.state.lock();
        state.docs_in_flight.len() + state.queries_in_flight.len()
    }
}

/// Spawn `fut` and return a handle every caller can await.
fn spawn_shared<T, F>(fut: F) -> SharedSync<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    async move { handle.await.map_err(DatabaseError::from).and_then(|result| result) }
        .boxed()
        .shared()
}
