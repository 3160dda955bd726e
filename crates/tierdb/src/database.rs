//! Database wiring
//!
//! A [`Database`] owns one memory/remote store pair and the three
//! coordinators built over it. Construct it with [`Database::builder`].

use std::sync::Arc;

use tracing::debug;

use tierdb_core::{MemoryChange, MemoryStore, RemoteStore};
use tierdb_storage::{InMemoryMemoryStore, InMemoryRemoteStore};

use crate::config::{DatabaseConfig, QuerySource};
use crate::error::Result;
use crate::mutate::MutationCoordinator;
use crate::reference::{CollectionRef, DocRef};
use crate::snapshot::SnapshotCoordinator;
use crate::stream::{BoxStream, broadcast_to_stream};
use crate::sync::SyncCoordinator;

/// Runs once against a freshly built database.
pub type Initializer = Box<dyn Fn(&Database) -> Result<()> + Send + Sync>;

struct DatabaseInner {
    config: DatabaseConfig,
    memory: Arc<dyn MemoryStore>,
    remote: Arc<dyn RemoteStore>,
    sync: SyncCoordinator,
    mutation: MutationCoordinator,
    snapshot: SnapshotCoordinator,
}

/// A two-tier document database.
///
/// Cheap to clone; clones share stores and coordinator state.
///
/// # Example
///
/// ```ignore
/// use tierdb::prelude::*;
///
/// let db = Database::builder().build()?;
/// let ann = db.collection("users").doc("1");
/// let mut data = DocData::new();
/// data.insert("name".into(), "Ann".into());
/// ann.set(data).await?;
/// assert!(ann.snapshot().await?.exists());
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.inner.config)
            .field("sync", &self.inner.sync)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Database over the given stores with default configuration.
    pub fn new(memory: Arc<dyn MemoryStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self::assemble(DatabaseConfig::default(), memory, remote)
    }

    /// Create a builder.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    fn assemble(
        config: DatabaseConfig,
        memory: Arc<dyn MemoryStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let sync = SyncCoordinator::new(memory.clone(), remote.clone());
        let mutation = MutationCoordinator::new(memory.clone(), remote.clone(), sync.clone());
        let snapshot =
            SnapshotCoordinator::new(memory.clone(), sync.clone(), config.default_query_source);
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                memory,
                remote,
                sync,
                mutation,
                snapshot,
            }),
        }
    }

    /// Document in the default collection.
    pub fn doc(&self, doc_id: impl Into<String>) -> DocRef {
        self.collection(self.inner.config.default_collection.clone())
            .doc(doc_id)
    }

    /// Handle to a collection.
    pub fn collection(&self, collection_id: impl Into<String>) -> CollectionRef {
        CollectionRef::new(self.clone(), collection_id.into())
    }

    /// Reconcile remote with its server and refresh local state.
    pub async fn sync_with_server(&self) -> Result<()> {
        self.inner.sync.sync_with_server().await
    }

    /// Erase everything in both tiers and forget all sync state.
    pub async fn remove_all_data(&self) -> Result<()> {
        self.inner.mutation.remove_all_data().await
    }

    /// Every change made to the memory tier from now on.
    pub fn memory_changes(&self) -> BoxStream<MemoryChange> {
        broadcast_to_stream(self.inner.memory.subscribe())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.inner.memory
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.inner.sync
    }

    pub fn mutation(&self) -> &MutationCoordinator {
        &self.inner.mutation
    }

    pub fn snapshots(&self) -> &SnapshotCoordinator {
        &self.inner.snapshot
    }
}

/// Builder for [`Database`].
///
/// Stores left unset default to the in-process reference tiers.
pub struct DatabaseBuilder {
    config: DatabaseConfig,
    memory: Option<Arc<dyn MemoryStore>>,
    remote: Option<Arc<dyn RemoteStore>>,
    initializers: Vec<Initializer>,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: DatabaseConfig::default(),
            memory: None,
            remote: None,
            initializers: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DatabaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the collection used by [`Database::doc`].
    pub fn default_collection(mut self, collection_id: impl Into<String>) -> Self {
        self.config.default_collection = collection_id.into();
        self
    }

    /// Set where query snapshots read from by default.
    pub fn default_query_source(mut self, source: QuerySource) -> Self {
        self.config.default_query_source = source;
        self
    }

    /// Use a specific memory tier.
    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Use a specific remote tier.
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Add an initializer. Initializers run in insertion order.
    pub fn with_initializer<F>(mut self, init: F) -> Self
    where
        F: Fn(&Database) -> Result<()> + Send + Sync + 'static,
    {
        self.initializers.push(Box::new(init));
        self
    }

    /// Build the database and run its initializers.
    pub fn build(self) -> Result<Database> {
        let memory: Arc<dyn MemoryStore> = match self.memory {
            Some(memory) => memory,
            None => Arc::new(InMemoryMemoryStore::with_change_capacity(
                self.config.change_channel_capacity,
            )),
        };
        let remote: Arc<dyn RemoteStore> = match self.remote {
            Some(remote) => remote,
            None => Arc::new(InMemoryRemoteStore::new()),
        };

        let db = Database::assemble(self.config, memory, remote);
        for init in &self.initializers {
            init(&db)?;
        }
        debug!(initializers = self.initializers.len(), "Database ready");
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_COLLECTION_ID;
    use crate::error::DatabaseError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tierdb_core::Trackable;

    #[test]
    fn test_default_collection() {
        let db = Database::builder().build().unwrap();
        assert_eq!(db.doc("1").id().collection_id(), DEFAULT_COLLECTION_ID);

        let db = Database::builder().default_collection("notes").build().unwrap();
        assert_eq!(db.doc("1").id().collection_id(), "notes");
    }

    #[test]
    fn test_initializers_run_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = calls.clone();
        let second = calls.clone();

        Database::builder()
            .with_initializer(move |_| {
                assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
                Ok(())
            })
            .with_initializer(move |_| {
                assert_eq!(second.fetch_add(1, Ordering::SeqCst), 1);
                Ok(())
            })
            .build()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_initializer_aborts_build() {
        let result = Database::builder()
            .with_initializer(|_| Err(DatabaseError::Config("missing schema".into())))
            .build();
        assert!(matches!(result, Err(DatabaseError::Config(_))));
    }

    #[tokio::test]
    async fn test_memory_changes() {
        use futures::StreamExt;

        let db = Database::builder().build().unwrap();
        let mut changes = db.memory_changes();
        db.collection("users")
            .doc("1")
            .set(tierdb_core::DocData::new())
            .await
            .unwrap();

        let change = changes.next().await.unwrap();
        assert!(change.affects_collection("users"));
        assert!(!change.affects_collection("posts"));
    }

    #[test]
    fn test_builders_do_not_share_state() {
        let a = Database::builder().build().unwrap();
        let b = Database::builder().build().unwrap();
        assert!(!Arc::ptr_eq(a.memory(), b.memory()));
    }
}
