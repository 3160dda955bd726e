//! # Tierdb Core
//!
//! Core identifiers, snapshots, predicates, errors and tier traits for
//! tierdb.
//!
//! This crate provides the foundational abstractions shared by the sync
//! layer and by every storage tier implementation.
//!
//! ## Key Traits
//!
//! - [`MemoryStore`]: In-process keyed storage with change notification
//! - [`RemoteStore`]: Replicated storage with existence checks and queries
//! - [`Trackable`]: Anything with a canonical key
//!
//! ## Key Types
//!
//! - [`DocId`] / [`QueryId`]: Identifiers and their [`CanonicalKey`]
//! - [`Predicate`]: Field conditions for collection queries
//! - [`DocSnapshot`] / [`QuerySnapshot`]: Immutable read results
//! - [`StoreError`]: Failures reported by a tier

pub mod error;
pub mod identifier;
pub mod predicate;
pub mod snapshot;
pub mod traits;

// Re-export main types
pub use error::*;
pub use identifier::*;
pub use predicate::*;
pub use snapshot::*;
pub use traits::*;
