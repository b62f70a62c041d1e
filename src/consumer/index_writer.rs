//! Re-derives the search index's parent/child join shape from each
//! `PlanNodeMessage` and upserts/deletes the corresponding document.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::envelope::{Action, PlanNodeMessage};
use crate::error::{Error, Result};

use super::Handler;

/// Backend contract for the search index. Implemented against
/// Elasticsearch/OpenSearch's document HTTP API; an in-memory impl backs
/// tests.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index_document(&self, index: &str, id: &str, routing: &str, body: Value) -> Result<()>;
    async fn delete_document(&self, index: &str, id: &str) -> Result<()>;

    /// Creates the index with its fixed join-field mapping if it doesn't
    /// already exist. Called once at startup.
    async fn ensure_index(&self, index: &str) -> Result<()>;
}

pub struct IndexWriterHandler<S: SearchIndex> {
    index: S,
}

impl<S: SearchIndex> IndexWriterHandler<S> {
    pub fn new(index: S) -> Self {
        Self { index }
    }

    /// Strips internal bookkeeping and reshapes `data.parentId`/`fieldName`
    /// into the index-side `join_field` structure.
    fn to_index_document(message: &PlanNodeMessage) -> Value {
        let mut data = message.data.clone();
        data.remove("_id");
        let parent_id = data.remove("parentId").and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default();
        let field_name = data.remove("fieldName").and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default();

        let join_field = if parent_id.is_empty() {
            json!({ "name": field_name })
        } else {
            json!({ "name": field_name, "parent": parent_id })
        };
        data.insert("join_field".to_owned(), join_field);
        Value::Object(data)
    }
}

#[async_trait]
impl<S: SearchIndex> Handler for IndexWriterHandler<S> {
    async fn handle(&self, body: Value) -> Result<()> {
        let message: PlanNodeMessage = serde_json::from_value(body).map_err(|e| Error::StorageError {
            message: format!("decoding plan node message: {e}"),
        })?;

        match message.action {
            Action::Create | Action::Update => {
                let parent_id = message.data.get("parentId").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
                let document = Self::to_index_document(&message);
                self.index
                    .index_document(&message.index, &message.key, &parent_id, document)
                    .await
            }
            Action::Delete => self.index.delete_document(&message.index, &message.key).await,
        }
    }
}

/// Fixed join-field mapping declared at index creation: `plan` is the
/// parent relation for `planCostShares` and `linkedPlanServices`;
/// `linkedPlanServices` is in turn the parent of `linkedService` and
/// `planserviceCostShares`.
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "objectId": { "type": "keyword" },
                "objectType": { "type": "keyword" },
                "_org": { "type": "keyword" },
                "planType": { "type": "keyword" },
                "creationDate": { "type": "keyword" },
                "deductible": { "type": "integer" },
                "copay": { "type": "integer" },
                "name": { "type": "text" },
                "linkedPlanServices": { "type": "nested" },
                "join_field": {
                    "type": "join",
                    "relations": {
                        "plan": ["planCostShares", "linkedPlanServices"],
                        "linkedPlanServices": ["linkedService", "planserviceCostShares"]
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryIndex {
        docs: Mutex<std::collections::HashMap<String, Value>>,
    }

    #[async_trait]
    impl SearchIndex for MemoryIndex {
        async fn index_document(&self, _index: &str, id: &str, _routing: &str, body: Value) -> Result<()> {
            self.docs.lock().unwrap().insert(id.to_owned(), body);
            Ok(())
        }
        async fn delete_document(&self, _index: &str, id: &str) -> Result<()> {
            self.docs.lock().unwrap().remove(id);
            Ok(())
        }
        async fn ensure_index(&self, _index: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_derives_join_field_and_strips_bookkeeping() {
        let handler = IndexWriterHandler::new(MemoryIndex::default());
        let mut data = serde_json::Map::new();
        data.insert("_id".into(), json!("cs1"));
        data.insert("objectId".into(), json!("cs1"));
        data.insert("objectType".into(), json!("ms"));
        data.insert("parentId".into(), json!("p1"));
        data.insert("fieldName".into(), json!("planCostShares"));

        let message = PlanNodeMessage::new(Action::Create, "cs1", data);
        handler.handle(serde_json::to_value(message).unwrap()).await.unwrap();

        let docs = handler.index.docs.lock().unwrap();
        let stored = &docs["cs1"];
        assert!(stored.get("_id").is_none());
        assert!(stored.get("parentId").is_none());
        assert!(stored.get("fieldName").is_none());
        assert_eq!(stored["join_field"], json!({"name": "planCostShares", "parent": "p1"}));
    }

    #[tokio::test]
    async fn delete_removes_by_id() {
        let handler = IndexWriterHandler::new(MemoryIndex::default());
        handler.index.docs.lock().unwrap().insert("cs1".to_owned(), json!({}));
        let message = PlanNodeMessage::new(Action::Delete, "cs1", serde_json::Map::new());
        handler.handle(serde_json::to_value(message).unwrap()).await.unwrap();
        assert!(!handler.index.docs.lock().unwrap().contains_key("cs1"));
    }
}
