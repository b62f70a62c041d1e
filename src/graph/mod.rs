//! The node codec: deterministic decomposition of a nested plan document into
//! a flat, reference-counted node graph, and structural merge of partial
//! updates against that graph.
//!
//! See [`extractor`] for decomposition (C1 extract) and [`merger`] for the
//! update path (C1 merge). [`expand`] walks `$ref` placeholders back into a
//! full document given any [`NodeFetch`] backend — the node store implements
//! it against the database, and tests implement it directly against an
//! in-memory [`NodeMap`].

pub mod extractor;
pub mod merger;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A single stored node, keyed by its own `objectId` once placed in a
/// [`NodeMap`]. Carries the injected bookkeeping fields (`_id`, `parentId`,
/// `fieldName`) plus whatever original fields it had, with child nodes
/// replaced by `{"$ref": id}` placeholders.
pub type Node = Map<String, Value>;

/// `objectId -> Node`, in deterministic post-order extraction order. Publish
/// fanout iterates this map in order, so callers must use an order-preserving
/// map rather than a `HashMap`.
pub type NodeMap = IndexMap<String, Node>;

pub const REF_KEY: &str = "$ref";
pub const ID_KEY: &str = "_id";
pub const PARENT_ID_KEY: &str = "parentId";
pub const FIELD_NAME_KEY: &str = "fieldName";
pub const REF_COUNT_KEY: &str = "refCount";

/// A map value is a node iff it carries string `objectId` and `objectType`.
pub fn is_node(m: &Map<String, Value>) -> bool {
    matches!(m.get("objectId"), Some(Value::String(_))) && matches!(m.get("objectType"), Some(Value::String(_)))
}

pub(crate) fn object_id(m: &Map<String, Value>) -> Result<String> {
    match m.get("objectId") {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(Error::JsonMergeError {
            message: "node is missing a string objectId".to_owned(),
        }),
    }
}

fn as_ref_id(v: &Value) -> Option<String> {
    match v {
        Value::Object(m) if m.len() == 1 => match m.get(REF_KEY) {
            Some(Value::String(id)) => Some(id.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Backend capable of resolving a single node by id, used to drive [`expand`].
/// Implemented by the node store against its database, and by [`NodeMap`]
/// directly for property tests that never touch storage.
pub trait NodeFetch: Sync {
    fn fetch_raw<'a>(&'a self, id: String) -> BoxFuture<'a, Result<Node>>;
}

impl NodeFetch for NodeMap {
    fn fetch_raw<'a>(&'a self, id: String) -> BoxFuture<'a, Result<Node>> {
        Box::pin(async move {
            self.get(&id).cloned().ok_or(Error::NodeNotFound { object_id: id })
        })
    }
}

/// Replaces every `$ref` under `id` with the referenced node, recursively.
/// Non-ref array elements and scalar leaves pass through unchanged.
pub fn expand<'a, F: NodeFetch + ?Sized>(fetch: &'a F, id: String) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let node = fetch.fetch_raw(id).await?;
        let mut out = Map::with_capacity(node.len());
        for (k, v) in node {
            out.insert(k, expand_value(fetch, v).await?);
        }
        Ok(Value::Object(out))
    })
}

fn expand_value<'a, F: NodeFetch + ?Sized>(fetch: &'a F, v: Value) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        if let Some(id) = as_ref_id(&v) {
            return expand(fetch, id).await;
        }
        match v {
            Value::Object(m) => {
                let mut out = Map::with_capacity(m.len());
                for (k, vv) in m {
                    out.insert(k, expand_value(fetch, vv).await?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(arr) => {
                let mut out = Vec::with_capacity(arr.len());
                for item in arr {
                    out.push(expand_value(fetch, item).await?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other),
        }
    })
}
