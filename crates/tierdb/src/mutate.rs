//! Mutation coordinator
//!
//! Applies writes to both tiers. Memory is written first so the caller's
//! next read sees the change; if the remote write then fails, memory is
//! restored to what it held before the call and the query cache is left
//! untouched.
//!
//! Writes to one document are serialized, so a rollback never undoes
//! another caller's write.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, trace, warn};

use tierdb_core::{CanonicalKey, DocData, DocId, MemoryStore, RemoteStore, StoreError, Trackable};

use crate::error::{DatabaseError, Result};
use crate::sync::{SyncCoordinator, SyncOptions};

/// Options for [`MutationCoordinator::update_doc_data`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Create the document from the partial data if it does not exist
    pub create_doc_if_not_exist: bool,
}

impl UpdateOptions {
    /// Update, creating the document if needed.
    pub fn upsert() -> Self {
        Self {
            create_doc_if_not_exist: true,
        }
    }
}

/// Writes documents to memory and remote.
#[derive(Clone)]
pub struct MutationCoordinator {
    memory: Arc<dyn MemoryStore>,
    remote: Arc<dyn RemoteStore>,
    sync: SyncCoordinator,
    /// Per-document write locks, present while a write holds or awaits one
    locks: Arc<DashMap<CanonicalKey, Arc<Mutex<()>>>>,
}

/// Exclusive write access to one document
struct DocWriteGuard {
    key: CanonicalKey,
    locks: Arc<DashMap<CanonicalKey, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocWriteGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's handle left means nobody is waiting
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl std::fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("sync", &self.sync)
            .field("locked_docs", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl MutationCoordinator {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        remote: Arc<dyn RemoteStore>,
        sync: SyncCoordinator,
    ) -> Self {
        Self {
            memory,
            remote,
            sync,
            locks: Arc::new(DashMap::new()),
        }
    }

    async fn lock_doc(&self, id: &DocId) -> DocWriteGuard {
        let key = id.canonical_key();
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        trace!(%key, "Acquired document write lock");
        DocWriteGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of documents with a write in progress or waiting.
    pub fn pending_writes(&self) -> usize {
        self.locks.len()
    }

    /// Overwrite a document in both tiers.
    #[instrument(skip(self, id, data), fields(key = %id))]
    pub async fn set_doc_data(&self, id: &DocId, data: DocData) -> Result<()> {
        let _guard = self.lock_doc(id).await;
        self.write_doc(id, data).await
    }

    async fn write_doc(&self, id: &DocId, data: DocData) -> Result<()> {
        let previous = self.memory.snapshot(id).into_data();
        self.memory.set(id, data.clone())?;

        if let Err(e) = self.remote.set(id, data).await {
            self.rollback(id, previous, &e);
            return Err(e.into());
        }

        self.sync
            .invalidate_query_cache_for_collection(id.collection_id());
        Ok(())
    }

    /// Shallow-merge `partial` into a document in both tiers.
    ///
    /// The remote document must exist unless
    /// `options.create_doc_if_not_exist` is set, in which case a missing
    /// document is created from `partial` alone.
    ///
    /// A failed remote write restores memory to its state before the call,
    /// including dropping a copy loaded from remote for the merge.
    #[instrument(skip(self, id, partial, options), fields(key = %id))]
    pub async fn update_doc_data(
        &self,
        id: &DocId,
        partial: DocData,
        options: UpdateOptions,
    ) -> Result<()> {
        let _guard = self.lock_doc(id).await;
        let exists = match self.remote.exists(id).await {
            Ok(exists) => exists,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };

        if !exists {
            if options.create_doc_if_not_exist {
                debug!("Document missing remotely, creating it");
                return self.write_doc(id, partial).await;
            }
            return Err(DatabaseError::DocumentNotFound {
                key: id.canonical_key().into(),
            });
        }

        // Merge over the remote document, not over nothing
        let previous = self.memory.snapshot(id).into_data();
        if previous.is_none() {
            self.sync.sync_doc(id, SyncOptions::forced()).await?;
        }

        self.memory.update(id, partial.clone())?;

        if let Err(e) = self.remote.update(id, partial).await {
            self.rollback(id, previous, &e);
            if !self.memory.exists(id) {
                // Dropped the loaded copy; the next read fetches again
                self.sync.forget(id);
            }
            if e.is_not_found() {
                return Err(DatabaseError::DocumentNotFound {
                    key: id.canonical_key().into(),
                });
            }
            return Err(e.into());
        }

        self.sync
            .invalidate_query_cache_for_collection(id.collection_id());
        Ok(())
    }

    /// Remove a document from both tiers.
    ///
    /// Memory is cleared before the remote call returns. A document the
    /// remote already lacks counts as removed.
    #[instrument(skip(self, id), fields(key = %id))]
    pub async fn remove_doc_data(&self, id: &DocId) -> Result<()> {
        let _guard = self.lock_doc(id).await;
        let previous = self.memory.snapshot(id).into_data();
        self.memory.remove(id)?;

        match self.remote.remove(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Document already absent remotely"),
            Err(e) => {
                self.rollback(id, previous, &e);
                return Err(e.into());
            }
        }

        self.sync
            .invalidate_query_cache_for_collection(id.collection_id());
        Ok(())
    }

    /// Clear sync state, empty memory, and erase remote storage.
    #[instrument(skip(self))]
    pub async fn remove_all_data(&self) -> Result<()> {
        self.sync.reset();
        self.memory.remove_all_data();
        self.remote.remove_all_data().await?;
        debug!("Removed all data");
        Ok(())
    }

    /// Put memory back the way it was before a failed write.
    fn rollback(&self, id: &DocId, previous: Option<DocData>, cause: &StoreError) {
        warn!(key = %id, error = %cause, "Remote write failed, rolling back memory");
        let restored = match previous {
            Some(data) => self.memory.set(id, data),
            None => self.memory.remove(id),
        };
        if let Err(e) = restored {
            warn!(key = %id, error = %e, "Memory rollback failed");
        }
    }
}
