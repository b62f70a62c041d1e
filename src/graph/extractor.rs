//! Depth-first, post-order extraction of a nested plan document into a flat
//! [`NodeMap`]. See the module-level docs on [`super`] for the shape of a
//! stored node.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

use super::{is_node, object_id, Node, NodeMap};

/// Decomposes `doc` (the root of a plan document) into its node graph. The
/// root is stored under `parentId=""` and `fieldName=root_type`.
pub fn extract(root_type: &str, doc: &Value) -> Result<NodeMap> {
    extract_with_parent(root_type, "", doc)
}

/// As [`extract`], but lets the caller supply the root slot's `parentId`.
/// Used by the merger to re-flatten an orphaned subtree, which already
/// carries its true `parentId`/`fieldName` from having been expanded out of
/// storage.
pub(crate) fn extract_with_parent(field_name: &str, parent_id: &str, doc: &Value) -> Result<NodeMap> {
    let root = doc.as_object().ok_or_else(|| Error::JsonMergeError {
        message: "document root must be a JSON object".to_owned(),
    })?;
    if !is_node(root) {
        return Err(Error::JsonMergeError {
            message: "document root must carry objectId and objectType".to_owned(),
        });
    }

    let mut nodes = NodeMap::new();
    let mut seen = HashSet::new();
    extract_node(root, parent_id, field_name, &mut nodes, &mut seen)?;
    Ok(nodes)
}

/// Extracts a node in place, inserting it (and everything beneath it) into
/// `nodes`, and returns the `{"$ref": id}` placeholder that should replace it
/// in its parent.
fn extract_node(
    m: &Map<String, Value>,
    parent_id: &str,
    field_name: &str,
    nodes: &mut NodeMap,
    seen: &mut HashSet<String>,
) -> Result<Value> {
    let id = object_id(m)?;
    if !seen.insert(id.clone()) {
        return Err(Error::CycleDetected { object_id: id });
    }

    let mut rewritten = Map::with_capacity(m.len() + 3);
    for (k, v) in m {
        let new_v = rewrite_field(k, v, &id, nodes, seen)?;
        rewritten.insert(k.clone(), new_v);
    }
    rewritten.insert(super::ID_KEY.to_owned(), Value::String(id.clone()));
    rewritten.insert(super::PARENT_ID_KEY.to_owned(), Value::String(parent_id.to_owned()));
    rewritten.insert(super::FIELD_NAME_KEY.to_owned(), Value::String(field_name.to_owned()));

    nodes.insert(id.clone(), rewritten as Node);
    Ok(json!({ super::REF_KEY: id }))
}

/// Rewrites a single field value of a node (or of an inline, non-node map)
/// under key `key`, belonging logically to `parent_id`.
fn rewrite_field(
    key: &str,
    value: &Value,
    parent_id: &str,
    nodes: &mut NodeMap,
    seen: &mut HashSet<String>,
) -> Result<Value> {
    match value {
        Value::Object(m) => {
            if is_node(m) {
                extract_node(m, parent_id, key, nodes, seen)
            } else {
                let mut rewritten = Map::with_capacity(m.len());
                for (k, v) in m {
                    rewritten.insert(k.clone(), rewrite_field(k, v, parent_id, nodes, seen)?);
                }
                Ok(Value::Object(rewritten))
            }
        }
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                out.push(rewrite_field(key, item, parent_id, nodes, seen)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::expand;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "objectId": "p1",
            "objectType": "plan",
            "_org": "o",
            "planCostShares": {
                "objectId": "cs1",
                "objectType": "ms",
                "deductible": 0
            },
            "linkedPlanServices": [
                {
                    "objectId": "lps1",
                    "objectType": "lps",
                    "linkedService": { "objectId": "ls1", "objectType": "s", "name": "x" }
                }
            ]
        })
    }

    #[tokio::test]
    async fn extracts_every_node() {
        let nodes = extract("plan", &sample()).unwrap();
        assert_eq!(nodes.len(), 4);
        assert!(nodes.contains_key("p1"));
        assert!(nodes.contains_key("cs1"));
        assert!(nodes.contains_key("lps1"));
        assert!(nodes.contains_key("ls1"));

        let root = &nodes["p1"];
        assert_eq!(root["parentId"], "");
        assert_eq!(root["fieldName"], "plan");
        assert_eq!(root["planCostShares"], json!({"$ref": "cs1"}));

        let lps = &nodes["lps1"];
        assert_eq!(lps["parentId"], "p1");
        assert_eq!(lps["fieldName"], "linkedPlanServices");
    }

    #[tokio::test]
    async fn round_trips_through_expand() {
        let original = sample();
        let nodes = extract("plan", &original).unwrap();
        let expanded = expand(&nodes, "p1".to_owned()).await.unwrap();

        // Structurally equal modulo the injected bookkeeping fields (P1).
        fn strip(v: &Value) -> Value {
            match v {
                Value::Object(m) => {
                    let mut out = Map::new();
                    for (k, val) in m {
                        if matches!(k.as_str(), "_id" | "parentId" | "fieldName" | "refCount") {
                            continue;
                        }
                        out.insert(k.clone(), strip(val));
                    }
                    Value::Object(out)
                }
                Value::Array(a) => Value::Array(a.iter().map(strip).collect()),
                other => other.clone(),
            }
        }

        assert_eq!(strip(&expanded), strip(&original));
    }

    #[tokio::test]
    async fn cycle_is_detected() {
        let cyclic = json!({
            "objectId": "p1",
            "objectType": "plan",
            "a": { "objectId": "p1", "objectType": "plan" }
        });
        let err = extract("plan", &cyclic).unwrap_err();
        assert_eq!(err.code(), "JSON_MERGE_ERROR");
    }
}
