//! Document and query snapshots
//!
//! Snapshots are immutable point-in-time views. A new snapshot is built on
//! every change; nothing here is mutated in place once handed out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Field map stored for a single document
pub type DocData = Map<String, Value>;

/// Shallow field merge: every top-level field of `partial` replaces the
/// field of the same name in `base`
pub fn shallow_merge(base: &mut DocData, partial: DocData) {
    for (field, value) in partial {
        base.insert(field, value);
    }
}

/// Point-in-time view of a single document
///
/// `exists` is derived: a snapshot exists iff it carries data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocSnapshot {
    id: String,
    data: Option<DocData>,
}

impl DocSnapshot {
    /// Create a snapshot from optional data
    pub fn new(id: impl Into<String>, data: Option<DocData>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Snapshot of an existing document
    pub fn present(id: impl Into<String>, data: DocData) -> Self {
        Self::new(id, Some(data))
    }

    /// Snapshot of a document that does not exist
    pub fn absent(id: impl Into<String>) -> Self {
        Self::new(id, None)
    }

    /// Document id within its collection
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the document exists
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Document data, if the document exists
    pub fn data(&self) -> Option<&DocData> {
        self.data.as_ref()
    }

    /// Single field of the document
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.as_ref()?.get(field)
    }

    /// Consume the snapshot, returning its data
    pub fn into_data(self) -> Option<DocData> {
        self.data
    }
}

/// Ordered, immutable result of a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    docs: Vec<DocSnapshot>,
}

impl QuerySnapshot {
    /// Create a query snapshot from document snapshots
    pub fn new(docs: Vec<DocSnapshot>) -> Self {
        Self { docs }
    }

    /// All documents, in result order
    pub fn docs(&self) -> &[DocSnapshot] {
        &self.docs
    }

    /// Number of documents
    pub fn count(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Whether a document with `id` is part of the result
    pub fn has_doc_with_id(&self, id: &str) -> bool {
        self.docs.iter().any(|doc| doc.id() == id)
    }

    /// Document with `id`, if part of the result
    pub fn get_doc_with_id(&self, id: &str) -> Option<&DocSnapshot> {
        self.docs.iter().find(|doc| doc.id() == id)
    }

    /// Document ids in result order
    pub fn ids(&self) -> Vec<String> {
        self.docs.iter().map(|doc| doc.id().to_string()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DocSnapshot> {
        self.docs.iter()
    }

    /// Keep only documents whose id is in `ids`, preserving this
    /// snapshot's order
    pub fn retain_ids(self, ids: &[String]) -> Self {
        let docs = self
            .docs
            .into_iter()
            .filter(|doc| ids.iter().any(|id| id == doc.id()))
            .collect();
        Self { docs }
    }

    /// `[{ "id": ..., "data": ... }]` rendering of the result
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.docs
                .iter()
                .map(|doc| json!({ "id": doc.id(), "data": doc.data() }))
                .collect(),
        )
    }
}

impl IntoIterator for QuerySnapshot {
    type Item = DocSnapshot;
    type IntoIter = std::vec::IntoIter<DocSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.into_iter()
    }
}

impl<'a> IntoIterator for &'a QuerySnapshot {
    type Item = &'a DocSnapshot;
    type IntoIter = std::slice::Iter<'a, DocSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter()
    }
}

impl FromIterator<DocSnapshot> for QuerySnapshot {
    fn from_iter<T: IntoIterator<Item = DocSnapshot>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: Value) -> DocData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_exists_is_derived_from_data() {
        assert!(DocSnapshot::present("1", data(json!({"a": 1}))).exists());
        assert!(!DocSnapshot::absent("1").exists());
        assert!(DocSnapshot::absent("1").data().is_none());
    }

    #[test]
    fn test_shallow_merge_replaces_top_level_fields() {
        let mut base = data(json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 2}}));
        shallow_merge(&mut base, data(json!({"b": 3, "nested": {"x": 9}})));
        assert_eq!(Value::Object(base), json!({"a": 1, "b": 3, "nested": {"x": 9}}));
    }

    #[test]
    fn test_query_snapshot_lookup() {
        let snapshot: QuerySnapshot = vec![
            DocSnapshot::present("1", data(json!({"n": "a"}))),
            DocSnapshot::present("2", data(json!({"n": "b"}))),
        ]
        .into_iter()
        .collect();

        assert_eq!(snapshot.count(), 2);
        assert!(snapshot.has_doc_with_id("2"));
        assert!(!snapshot.has_doc_with_id("3"));
        assert_eq!(
            snapshot.get_doc_with_id("1").and_then(|d| d.get("n")),
            Some(&json!("a"))
        );
        assert_eq!(snapshot.ids(), vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_retain_ids_keeps_snapshot_order() {
        let snapshot = QuerySnapshot::new(vec![
            DocSnapshot::present("a", DocData::new()),
            DocSnapshot::present("b", DocData::new()),
            DocSnapshot::present("c", DocData::new()),
        ]);
        let filtered = snapshot.retain_ids(&["c".to_string(), "a".to_string()]);
        assert_eq!(filtered.ids(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_to_json() {
        let snapshot = QuerySnapshot::new(vec![DocSnapshot::present("1", data(json!({"x": 1})))]);
        assert_eq!(snapshot.to_json(), json!([{"id": "1", "data": {"x": 1}}]));
    }
}
