//! # Tierdb Storage
//!
//! In-process implementations of the two storage tiers.
//!
//! ## Features
//!
//! - **InMemoryMemoryStore**: The fast tier, a keyed container per
//!   collection with a broadcast change feed
//! - **InMemoryRemoteStore**: A replica of an optional authoritative
//!   **InMemoryServer**, instrumented with call counters, latency, an
//!   offline switch and one-shot failure injection
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tierdb_core::{DocId, RemoteStore};
//! use tierdb_storage::{InMemoryRemoteStore, InMemoryServer, RemoteOp};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Arc::new(InMemoryServer::new());
//!     let remote = InMemoryRemoteStore::with_server(server.clone());
//!
//!     let id = DocId::new("users", "1");
//!     remote.set(&id, Default::default()).await.unwrap();
//!     remote.sync_with_server().await.unwrap();
//!
//!     assert!(server.get(&id).is_some());
//!     assert_eq!(remote.calls(RemoteOp::Set), 1);
//! }
//! ```

pub mod memory;
pub mod remote;

// Re-exports
pub use memory::{DEFAULT_CHANGE_CAPACITY, InMemoryMemoryStore};
pub use remote::{InMemoryRemoteStore, InMemoryServer, RemoteOp};
