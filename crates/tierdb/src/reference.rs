//! Client-facing handles
//!
//! Thin wrappers that pair an identifier with its [`Database`] and forward
//! to the coordinators.

use serde_json::Value;

use tierdb_core::{
    DocData, DocId, DocSnapshot, Operator, Predicate, QueryId, QuerySnapshot, Trackable,
};

use crate::database::Database;
use crate::error::Result;
use crate::mutate::UpdateOptions;
use crate::snapshot::QuerySnapshotOptions;
use crate::stream::{DocSnapshotStream, QuerySnapshotStream};
use crate::sync::SyncOptions;

/// Handle to a collection.
#[derive(Debug, Clone)]
pub struct CollectionRef {
    db: Database,
    collection_id: String,
}

impl CollectionRef {
    pub(crate) fn new(db: Database, collection_id: String) -> Self {
        Self { db, collection_id }
    }

    pub fn id(&self) -> &str {
        &self.collection_id
    }

    /// Handle to a document of this collection.
    pub fn doc(&self, doc_id: impl Into<String>) -> DocRef {
        DocRef {
            db: self.db.clone(),
            id: DocId::new(self.collection_id.clone(), doc_id),
        }
    }

    /// Query over this collection.
    pub fn query(&self, predicate: Predicate) -> QueryRef {
        QueryRef {
            db: self.db.clone(),
            id: QueryId::new(self.collection_id.clone(), predicate),
        }
    }

    /// Query matching every document.
    pub fn all(&self) -> QueryRef {
        self.query(Predicate::all())
    }
}

/// Handle to a single document.
#[derive(Debug, Clone)]
pub struct DocRef {
    db: Database,
    id: DocId,
}

impl DocRef {
    pub fn id(&self) -> &DocId {
        &self.id
    }

    /// Load the document from remote into memory.
    pub async fn sync(&self, options: SyncOptions) -> Result<()> {
        self.db.sync().sync_doc(&self.id, options).await
    }

    /// Overwrite the document.
    pub async fn set(&self, data: DocData) -> Result<()> {
        self.db.mutation().set_doc_data(&self.id, data).await
    }

    /// Merge `partial` into the document.
    pub async fn update(&self, partial: DocData, options: UpdateOptions) -> Result<()> {
        self.db
            .mutation()
            .update_doc_data(&self.id, partial, options)
            .await
    }

    pub async fn snapshot(&self) -> Result<DocSnapshot> {
        self.db.snapshots().doc_snapshot(&self.id).await
    }

    pub async fn on_snapshot(&self) -> Result<DocSnapshotStream> {
        self.db.snapshots().doc_on_snapshot(&self.id).await
    }

    /// Read-through existence check.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.snapshot().await?.exists())
    }

    pub async fn remove(&self) -> Result<()> {
        self.db.mutation().remove_doc_data(&self.id).await
    }
}

/// Handle to a query over one collection.
#[derive(Debug, Clone)]
pub struct QueryRef {
    db: Database,
    id: QueryId,
}

impl QueryRef {
    pub fn id(&self) -> &QueryId {
        &self.id
    }

    /// Narrow the query with one more condition.
    pub fn where_field(
        self,
        field: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let collection_id = self.id.collection_id().to_string();
        let predicate = self.id.predicate().clone().with_operator(field, op, value)?;
        Ok(Self {
            db: self.db,
            id: QueryId::new(collection_id, predicate),
        })
    }

    /// Run the query remotely and return the matched ids.
    pub async fn sync(&self, options: SyncOptions) -> Result<Vec<String>> {
        self.db.sync().sync_query(&self.id, options).await
    }

    pub async fn snapshot(&self, options: QuerySnapshotOptions) -> Result<QuerySnapshot> {
        self.db.snapshots().query_snapshot(&self.id, options).await
    }

    /// Live result, evaluated against memory.
    pub fn on_snapshot(&self) -> QuerySnapshotStream {
        self.db.snapshots().query_on_snapshot(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn data(value: Value) -> DocData {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_doc_ref_round_trip() {
        let db = Database::builder().build().unwrap();
        let doc = db.collection("users").doc("1");

        assert!(!doc.exists().await.unwrap());
        doc.set(data(json!({"name": "Ann"}))).await.unwrap();
        assert!(doc.exists().await.unwrap());

        doc.update(data(json!({"age": 30})), UpdateOptions::default())
            .await
            .unwrap();
        let snapshot = doc.snapshot().await.unwrap();
        assert_eq!(snapshot.data(), Some(&data(json!({"name": "Ann", "age": 30}))));

        doc.remove().await.unwrap();
        assert!(!doc.snapshot().await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_where_field_narrows() {
        let db = Database::builder().build().unwrap();
        let users = db.collection("users");
        users.doc("a").set(data(json!({"age": 20}))).await.unwrap();
        users.doc("b").set(data(json!({"age": 40}))).await.unwrap();

        let query = users.all().where_field("age", Operator::Gt, 30).unwrap();
        assert_eq!(query.id().collection_id(), "users");

        let result = query.snapshot(QuerySnapshotOptions::default()).await.unwrap();
        assert_eq!(result.ids(), vec!["b".to_string()]);
        assert_eq!(query.sync(SyncOptions::default()).await.unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_where_field_rejects_bad_operand() {
        let db = Database::builder().build().unwrap();
        let result = db.collection("users").all().where_field("age", Operator::In, 3);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_query_ref_on_snapshot() {
        let db = Database::builder().build().unwrap();
        let users = db.collection("users");
        users.doc("a").set(DocData::new()).await.unwrap();

        let mut stream = users.all().on_snapshot();
        assert_eq!(stream.next().await.unwrap().count(), 1);
    }
}
