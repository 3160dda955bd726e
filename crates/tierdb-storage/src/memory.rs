//! In-memory tier implementation
//!
//! This module provides [`InMemoryMemoryStore`], the default fast tier: a
//! keyed container per collection with a broadcast change feed.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tierdb_core::{
    DocData, DocId, DocSnapshot, MemoryChange, MemoryStore, Predicate, QuerySnapshot,
    StoreError, Trackable, shallow_merge,
};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default capacity of the change broadcast channel
pub const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// In-memory implementation of MemoryStore
///
/// Uses `DashMap` keyed by collection id; documents inside a collection are
/// kept in a `BTreeMap`, so query results come back ordered by document id.
#[derive(Debug)]
pub struct InMemoryMemoryStore {
    /// Map from collection id to its documents
    collections: DashMap<String, BTreeMap<String, DocData>>,
    /// Change notification sender
    change_tx: broadcast::Sender<MemoryChange>,
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::with_change_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// Create with a custom change channel capacity
    pub fn with_change_capacity(capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            collections: DashMap::new(),
            change_tx,
        }
    }

    /// Total number of documents across all collections
    pub fn doc_count(&self) -> usize {
        self.collections.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of live change subscribers
    pub fn subscriber_count(&self) -> usize {
        self.change_tx.receiver_count()
    }

    fn notify(&self, change: MemoryChange) {
        // No receivers is fine
        let _ = self.change_tx.send(change);
    }
}

impl MemoryStore for InMemoryMemoryStore {
    fn set(&self, id: &DocId, data: DocData) -> Result<(), StoreError> {
        trace!(key = %id, "Memory set");
        self.collections
            .entry(id.collection_id().to_string())
            .or_default()
            .insert(id.doc_id().to_string(), data);
        self.notify(MemoryChange::doc(id));
        Ok(())
    }

    fn update(&self, id: &DocId, partial: DocData) -> Result<(), StoreError> {
        trace!(key = %id, "Memory update");
        {
            let mut docs = self
                .collections
                .entry(id.collection_id().to_string())
                .or_default();
            let doc = docs.entry(id.doc_id().to_string()).or_default();
            shallow_merge(doc, partial);
        }
        self.notify(MemoryChange::doc(id));
        Ok(())
    }

    fn remove(&self, id: &DocId) -> Result<(), StoreError> {
        let removed = self
            .collections
            .get_mut(id.collection_id())
            .and_then(|mut docs| docs.remove(id.doc_id()))
            .is_some();

        if removed {
            trace!(key = %id, "Memory remove");
            self.notify(MemoryChange::doc(id));
        }
        Ok(())
    }

    fn snapshot(&self, id: &DocId) -> DocSnapshot {
        let data = self
            .collections
            .get(id.collection_id())
            .and_then(|docs| docs.get(id.doc_id()).cloned());
        DocSnapshot::new(id.doc_id(), data)
    }

    fn query(&self, collection_id: &str, predicate: &Predicate) -> QuerySnapshot {
        match self.collections.get(collection_id) {
            Some(docs) => docs
                .iter()
                .filter(|(_, data)| predicate.matches(data))
                .map(|(doc_id, data)| DocSnapshot::present(doc_id.clone(), data.clone()))
                .collect(),
            None => QuerySnapshot::default(),
        }
    }

    fn collections(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .collections
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    fn subscribe(&self) -> broadcast::Receiver<MemoryChange> {
        self.change_tx.subscribe()
    }

    fn remove_all_data(&self) {
        self.collections.clear();
        debug!("Cleared all documents from memory");
        self.notify(MemoryChange::Cleared);
    }
}
