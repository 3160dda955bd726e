//! Collaborator traits for the two storage tiers
//!
//! ## Key Traits
//!
//! - [`MemoryStore`]: fast in-process keyed container with change
//!   notification. Calls never suspend.
//! - [`RemoteStore`]: slower replicated store, possibly offline. Every
//!   call is a suspension point.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::identifier::{DocId, QueryId, Trackable};
use crate::predicate::Predicate;
use crate::snapshot::{DocData, DocSnapshot, QuerySnapshot};

/// Notification that memory state changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryChange {
    /// One document was written or removed
    Doc { collection_id: String, doc_id: String },
    /// The whole store was emptied
    Cleared,
}

impl MemoryChange {
    /// Create a change notification for one document
    pub fn doc(id: &DocId) -> Self {
        Self::Doc {
            collection_id: id.collection_id().to_string(),
            doc_id: id.doc_id().to_string(),
        }
    }

    /// Whether the change can affect documents of `collection_id`
    pub fn affects_collection(&self, collection_id: &str) -> bool {
        match self {
            Self::Doc {
                collection_id: changed,
                ..
            } => changed == collection_id,
            Self::Cleared => true,
        }
    }

    /// Whether the change can affect the document `id`
    pub fn affects_doc(&self, id: &DocId) -> bool {
        match self {
            Self::Doc {
                collection_id,
                doc_id,
            } => collection_id == id.collection_id() && doc_id == id.doc_id(),
            Self::Cleared => true,
        }
    }
}

/// The fast in-process tier
///
/// All methods are synchronous: code between two remote-store awaits sees
/// memory calls as atomic. Every successful write publishes a
/// [`MemoryChange`] to subscribers.
pub trait MemoryStore: Send + Sync {
    /// Overwrite a document with `data`
    fn set(&self, id: &DocId, data: DocData) -> Result<(), StoreError>;

    /// Shallow-merge `partial` into a document, creating it if absent
    fn update(&self, id: &DocId, partial: DocData) -> Result<(), StoreError>;

    /// Remove a document; removing an absent document is a no-op
    fn remove(&self, id: &DocId) -> Result<(), StoreError>;

    /// Current snapshot of a document
    fn snapshot(&self, id: &DocId) -> DocSnapshot;

    /// Whether the document is present
    fn exists(&self, id: &DocId) -> bool {
        self.snapshot(id).exists()
    }

    /// Evaluate `predicate` over one collection
    fn query(&self, collection_id: &str, predicate: &Predicate) -> QuerySnapshot;

    /// Ids of every collection currently held
    fn collections(&self) -> Vec<String>;

    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<MemoryChange>;

    /// Drop every document
    fn remove_all_data(&self);
}

/// The slow, replicated tier
///
/// Implementations report a missing document through
/// [`RemoteStore::snapshot`] as an absent snapshot rather than an error;
/// coordinators additionally normalize [`StoreError::NotFound`] on reads.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a document
    async fn snapshot(&self, id: &DocId) -> Result<DocSnapshot, StoreError>;

    /// Overwrite a document, creating it if absent
    async fn set(&self, id: &DocId, data: DocData) -> Result<(), StoreError>;

    /// Shallow-merge `partial` into an existing document
    async fn update(&self, id: &DocId, partial: DocData) -> Result<(), StoreError>;

    /// Remove a document
    async fn remove(&self, id: &DocId) -> Result<(), StoreError>;

    /// Whether a document exists
    async fn exists(&self, id: &DocId) -> Result<bool, StoreError>;

    /// Run a query
    async fn query(&self, query: &QueryId) -> Result<QuerySnapshot, StoreError>;

    /// Reconcile with the authoritative server
    async fn sync_with_server(&self) -> Result<(), StoreError>;

    /// Erase all stored data
    async fn remove_all_data(&self) -> Result<(), StoreError>;
}
