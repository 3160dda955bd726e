//! Document and query identifiers
//!
//! Every identifier renders a [`CanonicalKey`]. Caches and in-flight
//! deduplication are keyed by that string only: two identifiers are
//! interchangeable for caching iff their canonical keys are equal.

use std::fmt::Display;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::predicate::Predicate;

/// Deterministic string key derived from an identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CanonicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CanonicalKey> for String {
    fn from(key: CanonicalKey) -> Self {
        key.0
    }
}

/// Something the sync layer can track by canonical key
pub trait Trackable {
    /// Collection the identifier belongs to
    fn collection_id(&self) -> &str;

    /// Key used for every cache and dedup lookup
    fn canonical_key(&self) -> CanonicalKey;
}

/// Identifies a single document: `(collection_id, doc_id)`
///
/// Canonical key: `"{collection_id}/{doc_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocId {
    collection_id: String,
    doc_id: String,
}

impl DocId {
    pub fn new(collection_id: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            doc_id: doc_id.into(),
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }
}

impl Trackable for DocId {
    fn collection_id(&self) -> &str {
        &self.collection_id
    }

    fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey(format!("{}/{}", self.collection_id, self.doc_id))
    }
}

impl Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection_id, self.doc_id)
    }
}

/// Identifies a query over a collection: `(collection_id, predicate)`
///
/// Canonical key: `"{collection_id}/{predicate.canonical()}"`. Equality and
/// hashing follow the canonical key, so predicates built in a different
/// field order still compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryId {
    collection_id: String,
    predicate: Predicate,
}

impl QueryId {
    pub fn new(collection_id: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            collection_id: collection_id.into(),
            predicate,
        }
    }

    /// Query matching every document of a collection
    pub fn all(collection_id: impl Into<String>) -> Self {
        Self::new(collection_id, Predicate::all())
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

impl Trackable for QueryId {
    fn collection_id(&self) -> &str {
        &self.collection_id
    }

    fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey(format!(
            "{}/{}",
            self.collection_id,
            self.predicate.canonical()
        ))
    }
}

impl PartialEq for QueryId {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for QueryId {}

impl Hash for QueryId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_key().hash(state);
    }
}

impl Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_key())
    }
}
