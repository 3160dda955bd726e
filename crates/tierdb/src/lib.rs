//! # Tierdb
//!
//! Client-side document access over two storage tiers: a fast in-process
//! memory store and a slower, possibly offline, remote store.
//!
//! Reads are served from memory and transparently fetched from remote the
//! first time a document or query is asked for. Concurrent requests for the
//! same target share a single remote round-trip. Writes go to both tiers and
//! drop the affected collection's cached query results.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tierdb::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let db = Database::builder().build()?;
//!     let users = db.collection("users");
//!
//!     let mut ann = DocData::new();
//!     ann.insert("name".into(), "Ann".into());
//!     ann.insert("age".into(), 31.into());
//!     users.doc("1").set(ann).await?;
//!
//!     // Served from memory, no remote round-trip
//!     let snapshot = users.doc("1").snapshot().await?;
//!     assert!(snapshot.exists());
//!
//!     // Ask remote which documents match
//!     let adults = users
//!         .query(Predicate::all().gte("age", 18))
//!         .snapshot(QuerySnapshotOptions::default())
//!         .await?;
//!     println!("{}", adults.to_json());
//!
//!     // Follow a document as memory changes
//!     let mut live = users.doc("1").on_snapshot().await?;
//!     while let Some(snapshot) = live.next().await {
//!         println!("{:?}", snapshot.data());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### SyncCoordinator
//!
//! Decides whether a document or query needs a remote fetch, deduplicates
//! concurrent fetches by canonical key, caches query results per collection,
//! and drives full resynchronization with the server.
//!
//! ### MutationCoordinator
//!
//! Writes to both tiers. A failed remote write restores memory.
//!
//! ### SnapshotCoordinator
//!
//! Point-in-time and live reads of documents and queries.

pub mod config;
pub mod database;
pub mod error;
pub mod mutate;
pub mod reference;
pub mod snapshot;
pub mod stream;
pub mod sync;

pub use config::{DEFAULT_COLLECTION_ID, DatabaseConfig, QuerySource};
pub use database::{Database, DatabaseBuilder, Initializer};
pub use error::{DatabaseError, Result};
pub use mutate::{MutationCoordinator, UpdateOptions};
pub use reference::{CollectionRef, DocRef, QueryRef};
pub use snapshot::{QuerySnapshotOptions, SnapshotCoordinator};
pub use stream::{DocSnapshotStream, QuerySnapshotStream};
pub use sync::{SyncCoordinator, SyncOptions};

// Re-export core types
pub use tierdb_core::{
    CanonicalKey, Condition, DocData, DocId, DocSnapshot, MemoryChange, MemoryStore, Operator,
    Predicate, PredicateError, QueryId, QuerySnapshot, RemoteStore, StoreError, Trackable,
};

/// Prelude for convenient imports.
///
/// ```ignore
/// use tierdb::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CollectionRef, Database, DatabaseConfig, DatabaseError, DocData, DocId, DocRef,
        DocSnapshot, Operator, Predicate, QueryId, QueryRef, QuerySnapshot,
        QuerySnapshotOptions, QuerySource, Result, SyncOptions, UpdateOptions,
    };

    // Re-export futures StreamExt for convenient stream iteration
    pub use futures::StreamExt;
}
