//! The node store: a persistent `_id -> node` map with reference-counted
//! upsert, reference-expansion fetch, and reference-counted delete.

pub mod mongo;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::{Error, Result};
use crate::graph::{expand, Node, NodeFetch, NodeMap};

/// Per-call deadline applied uniformly across store backends. A call that
/// exceeds it surfaces `STORAGE_TIMEOUT` rather than the backend's own error,
/// per §4.2.
pub async fn with_timeout<T>(timeout: Duration, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::StorageTimeout {
            elapsed_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Backend contract for the node store. Any document store offering atomic
/// per-key upsert with a `$set`+`$inc` composite update, and per-key delete,
/// can implement this.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Upserts every `(id, node)` pair. A node that does not carry a
    /// `refCount` field is treated as a new reference and increments the
    /// stored counter by one (first insert or re-reference); a node that
    /// does carry one overwrites the counter verbatim, letting callers pin
    /// refCount when re-storing an unchanged subtree.
    async fn store_nodes(&self, nodes: &NodeMap) -> Result<()>;

    /// Fetches a single node with no `$ref` expansion.
    async fn get_node_raw(&self, id: &str) -> Result<Node>;

    /// Fetches `id` and recursively expands every `$ref` beneath it.
    async fn get_expanded_node(&self, id: &str) -> Result<serde_json::Value>;

    /// For each node: decrement `refCount` if greater than one, otherwise
    /// delete the row outright.
    async fn delete_graph_nodes(&self, nodes: &NodeMap) -> Result<()>;

    /// True iff a raw node with this id already exists.
    async fn exists(&self, id: &str) -> Result<bool> {
        match self.get_node_raw(id).await {
            Ok(_) => Ok(true),
            Err(Error::NodeNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Lets [`expand`] drive directly off any [`NodeStore`] implementor.
struct StoreFetch<'a>(&'a dyn NodeStore);

impl NodeFetch for StoreFetch<'_> {
    fn fetch_raw<'a>(&'a self, id: String) -> BoxFuture<'a, Result<Node>> {
        Box::pin(async move { self.0.get_node_raw(&id).await })
    }
}

/// Shared expansion helper so every `NodeStore` impl gets `get_expanded_node`
/// for free by delegating to this from their trait method body.
pub(crate) async fn expand_via(store: &dyn NodeStore, id: &str) -> Result<serde_json::Value> {
    let fetch = StoreFetch(store);
    expand(&fetch, id.to_owned()).await
}

/// An in-memory `NodeStore`, used by service-level tests and as a reference
/// implementation of the refcount semantics without a real database.
#[derive(Default)]
pub struct MemoryNodeStore {
    inner: tokio::sync::RwLock<NodeMap>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn store_nodes(&self, nodes: &NodeMap) -> Result<()> {
        let mut guard = self.inner.write().await;
        for (id, node) in nodes {
            let mut stored = node.clone();
            let explicit_ref_count = stored.get(crate::graph::REF_COUNT_KEY).cloned();
            match explicit_ref_count {
                Some(count) => {
                    stored.insert(crate::graph::REF_COUNT_KEY.to_owned(), count);
                }
                None => {
                    let current = guard
                        .get(id)
                        .and_then(|n| n.get(crate::graph::REF_COUNT_KEY))
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0);
                    stored.insert(crate::graph::REF_COUNT_KEY.to_owned(), (current + 1).into());
                }
            }
            guard.insert(id.clone(), stored);
        }
        Ok(())
    }

    async fn get_node_raw(&self, id: &str) -> Result<Node> {
        let guard = self.inner.read().await;
        guard.get(id).cloned().ok_or_else(|| Error::NodeNotFound {
            object_id: id.to_owned(),
        })
    }

    async fn get_expanded_node(&self, id: &str) -> Result<serde_json::Value> {
        expand_via(self, id).await
    }

    async fn delete_graph_nodes(&self, nodes: &NodeMap) -> Result<()> {
        let mut guard = self.inner.write().await;
        for id in nodes.keys() {
            let ref_count = guard.get(id).and_then(|n| n.get(crate::graph::REF_COUNT_KEY)).and_then(|v| v.as_i64());
            match ref_count {
                Some(c) if c > 1 => {
                    if let Some(n) = guard.get_mut(id) {
                        n.insert(crate::graph::REF_COUNT_KEY.to_owned(), (c - 1).into());
                    }
                }
                _ => {
                    guard.shift_remove(id);
                }
            }
        }
        Ok(())
    }
}
