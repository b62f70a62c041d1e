//! MongoDB-backed [`NodeStore`]. Nodes are stored verbatim as BSON documents
//! keyed by `_id`; refcount upserts use Mongo's native `$set`/`$inc` update
//! operators so the increment stays atomic per document.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::UpdateOptions;
use mongodb::Collection;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::graph::{Node, NodeMap, REF_COUNT_KEY};

use super::{expand_via, with_timeout, NodeStore};

pub struct MongoNodeStore {
    collection: Collection<Document>,
    timeout: Duration,
}

impl MongoNodeStore {
    pub fn new(collection: Collection<Document>, timeout: Duration) -> Self {
        Self { collection, timeout }
    }
}

fn node_to_document(node: &Node) -> Result<Document> {
    mongodb::bson::to_document(node).map_err(|e| Error::StorageError {
        message: format!("encoding node as BSON: {e}"),
    })
}

fn document_to_node(doc: Document) -> Result<Node> {
    let value: Value = mongodb::bson::from_document(doc).map_err(|e| Error::StorageError {
        message: format!("decoding node from BSON: {e}"),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::StorageError {
            message: "stored node was not a JSON object".to_owned(),
        }),
    }
}

#[async_trait]
impl NodeStore for MongoNodeStore {
    async fn store_nodes(&self, nodes: &NodeMap) -> Result<()> {
        with_timeout(self.timeout, async {
            for (id, node) in nodes {
                let mut set_doc = node_to_document(node)?;
                let carries_ref_count = set_doc.remove(REF_COUNT_KEY);
                set_doc.remove("_id"); // immutable once created; never rewritten by $set

                let mut update = doc! { "$set": set_doc.clone() };
                match carries_ref_count {
                    Some(count) => {
                        update
                            .get_document_mut("$set")
                            .expect("just inserted")
                            .insert(REF_COUNT_KEY, count);
                    }
                    None => {
                        update.insert("$inc", doc! { REF_COUNT_KEY: 1_i64 });
                    }
                }

                self.collection
                    .update_one(doc! { "_id": id.clone() }, update)
                    .with_options(UpdateOptions::builder().upsert(true).build())
                    .await
                    .map_err(|e| Error::StorageError {
                        message: format!("upserting node {id}: {e}"),
                    })?;
            }
            Ok(())
        })
        .await
    }

    async fn get_node_raw(&self, id: &str) -> Result<Node> {
        with_timeout(self.timeout, async {
            let doc = self
                .collection
                .find_one(doc! { "_id": id })
                .await
                .map_err(|e| Error::StorageError {
                    message: format!("fetching node {id}: {e}"),
                })?
                .ok_or_else(|| Error::NodeNotFound { object_id: id.to_owned() })?;
            document_to_node(doc)
        })
        .await
    }

    async fn get_expanded_node(&self, id: &str) -> Result<Value> {
        with_timeout(self.timeout, expand_via(self, id)).await
    }

    async fn delete_graph_nodes(&self, nodes: &NodeMap) -> Result<()> {
        with_timeout(self.timeout, async {
            for id in nodes.keys() {
                let current = self
                    .collection
                    .find_one(doc! { "_id": id.clone() })
                    .await
                    .map_err(|e| Error::StorageError {
                        message: format!("fetching node {id} before delete: {e}"),
                    })?;

                let ref_count = current
                    .as_ref()
                    .and_then(|d| d.get_i64(REF_COUNT_KEY).ok())
                    .unwrap_or(0);

                if ref_count > 1 {
                    self.collection
                        .update_one(doc! { "_id": id.clone() }, doc! { "$inc": { REF_COUNT_KEY: -1_i64 } })
                        .await
                        .map_err(|e| Error::StorageError {
                            message: format!("decrementing refCount for {id}: {e}"),
                        })?;
                } else {
                    self.collection
                        .delete_one(doc! { "_id": id.clone() })
                        .await
                        .map_err(|e| Error::StorageError {
                            message: format!("deleting node {id}: {e}"),
                        })?;
                }
            }
            Ok(())
        })
        .await
    }
}
