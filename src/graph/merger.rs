//! Structural merge of a partial update into an expanded plan document. See
//! §4.1 of the design for the field/array merge rules; this module follows
//! them literally, including the documented asymmetry that non-node update
//! array elements are dropped rather than appended.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::{extractor::extract_with_parent, is_node, object_id, NodeMap};

/// Merges `update` into `original` (both expanded documents). Returns the
/// merged expanded document and the set of nodes orphaned by the merge,
/// already flattened into stored shape (`$ref` placeholders, bookkeeping
/// fields) so they can be handed straight to `DeleteGraphNodes` and the
/// delete-event publisher.
pub fn merge(original: &Value, update: &Value) -> Result<(Value, NodeMap)> {
    let om = original.as_object().ok_or_else(|| Error::JsonMergeError {
        message: "original document must be a JSON object".to_owned(),
    })?;
    let um = update.as_object().ok_or_else(|| Error::JsonMergeError {
        message: "update document must be a JSON object".to_owned(),
    })?;

    let mut to_delete = NodeMap::new();
    let merged = merge_object(om, um, &mut to_delete)?;
    Ok((merged, to_delete))
}

fn merge_object(om: &Map<String, Value>, um: &Map<String, Value>, to_delete: &mut NodeMap) -> Result<Value> {
    if is_node(om) && is_node(um) {
        let o_id = object_id(om)?;
        let u_id = object_id(um)?;
        if o_id != u_id {
            flatten_orphan(om, to_delete)?;
            return Ok(Value::Object(um.clone()));
        }
    }

    let mut merged = om.clone();
    for (k, uv) in um {
        let nv = merge_field(merged.get(k), uv, to_delete)?;
        merged.insert(k.clone(), nv);
    }
    Ok(Value::Object(merged))
}

/// Applies the field merge rule for a single key: recurse into matching
/// maps, set-merge matching arrays, otherwise overwrite. `JSON_MERGE_ERROR`
/// if `u`'s shape can't be reconciled with an incompatible existing `o`.
fn merge_field(o: Option<&Value>, u: &Value, to_delete: &mut NodeMap) -> Result<Value> {
    match u {
        Value::Object(um) => match o {
            Some(Value::Object(om)) => merge_object(om, um, to_delete),
            Some(other) if !other.is_null() => Err(Error::JsonMergeError {
                message: format!("cannot merge object into existing {other}"),
            }),
            _ => Ok(u.clone()),
        },
        Value::Array(ua) => match o {
            Some(Value::Array(oa)) => merge_array(oa, ua, to_delete),
            Some(other) if !other.is_null() => Err(Error::JsonMergeError {
                message: format!("cannot merge array into existing {other}"),
            }),
            _ => Ok(u.clone()),
        },
        other => Ok(other.clone()),
    }
}

/// Arrays are treated as sets keyed by `objectId`: matching update elements
/// merge in place, unmatched ones append, survivors from the original that
/// weren't touched by the update are kept, and non-node update elements are
/// silently dropped (not merged, not appended).
fn merge_array(oa: &[Value], ua: &[Value], to_delete: &mut NodeMap) -> Result<Value> {
    let mut by_id: IndexMap<String, Value> = IndexMap::new();
    let mut passthrough: Vec<Value> = Vec::new();

    for ov in oa {
        match ov {
            Value::Object(om) if is_node(om) => {
                by_id.insert(object_id(om)?, ov.clone());
            }
            _ => passthrough.push(ov.clone()),
        }
    }

    let mut merged_nodes: Vec<Value> = Vec::new();
    for uv in ua {
        let um = match uv {
            Value::Object(m) if is_node(m) => m,
            _ => continue, // non-node update elements are dropped
        };
        let id = object_id(um)?;
        if let Some(ov) = by_id.shift_remove(&id) {
            let om = ov.as_object().expect("by_id only holds objects");
            merged_nodes.push(merge_object(om, um, to_delete)?);
        } else {
            merged_nodes.push(uv.clone());
        }
    }

    // Unchanged survivors, in their original relative order.
    for (_, ov) in by_id {
        merged_nodes.push(ov);
    }

    let mut out = passthrough;
    out.extend(merged_nodes);
    Ok(Value::Array(out))
}

/// Re-flattens an orphaned expanded subtree into stored-shape nodes (one
/// entry per node in the subtree, including the top one) so the caller can
/// decrement refcounts / publish deletes for all of it, not just its root.
fn flatten_orphan(om: &Map<String, Value>, to_delete: &mut NodeMap) -> Result<()> {
    let field_name = om
        .get(super::FIELD_NAME_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let parent_id = om
        .get(super::PARENT_ID_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let mut cleaned = om.clone();
    cleaned.remove(super::REF_COUNT_KEY);

    let subtree = extract_with_parent(&field_name, &parent_id, &Value::Object(cleaned))?;
    for (id, node) in subtree {
        to_delete.insert(id, node);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{expand, extractor::extract};
    use serde_json::json;

    async fn expanded(doc: &Value) -> Value {
        let nodes = extract("plan", doc).unwrap();
        expand(&nodes, "p1".to_owned()).await.unwrap()
    }

    fn plan(cs_deductible: i64) -> Value {
        json!({
            "objectId": "p1",
            "objectType": "plan",
            "planCostShares": { "objectId": "cs1", "objectType": "ms", "deductible": cs_deductible },
            "linkedPlanServices": []
        })
    }

    #[tokio::test]
    async fn merge_identity_is_noop() {
        let original = expanded(&plan(0)).await;
        let (merged, to_delete) = merge(&original, &json!({})).unwrap();
        assert_eq!(merged, original);
        assert!(to_delete.is_empty());
    }

    #[tokio::test]
    async fn field_merge_updates_in_place() {
        let original = expanded(&plan(0)).await;
        let update = json!({ "planCostShares": { "objectId": "cs1", "objectType": "ms", "deductible": 5 } });
        let (merged, to_delete) = merge(&original, &update).unwrap();
        assert_eq!(merged["planCostShares"]["deductible"], 5);
        assert!(to_delete.is_empty());
    }

    #[tokio::test]
    async fn node_replacement_orphans_old_child() {
        let original = expanded(&plan(0)).await;
        let update = json!({ "planCostShares": { "objectId": "cs2", "objectType": "ms", "deductible": 9 } });
        let (merged, to_delete) = merge(&original, &update).unwrap();
        assert_eq!(merged["planCostShares"]["objectId"], "cs2");
        assert_eq!(to_delete.len(), 1);
        assert!(to_delete.contains_key("cs1"));
    }

    #[tokio::test]
    async fn array_append_and_merge() {
        let with_service = json!({
            "objectId": "p1",
            "objectType": "plan",
            "planCostShares": { "objectId": "cs1", "objectType": "ms", "deductible": 0 },
            "linkedPlanServices": [
                { "objectId": "lps1", "objectType": "lps", "name": "a" }
            ]
        });
        let original = expanded(&with_service).await;

        let update = json!({
            "linkedPlanServices": [
                { "objectId": "lps1", "objectType": "lps", "name": "b" },
                { "objectId": "lps2", "objectType": "lps", "name": "c" }
            ]
        });
        let (merged, to_delete) = merge(&original, &update).unwrap();
        let arr = merged["linkedPlanServices"].as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["name"], "b");
        assert_eq!(arr[1]["name"], "c");
        assert!(to_delete.is_empty());
    }

    #[tokio::test]
    async fn non_node_array_update_elements_are_dropped() {
        let original = expanded(&plan(0)).await;
        let update = json!({ "linkedPlanServices": ["not-a-node"] });
        let (merged, _) = merge(&original, &update).unwrap();
        assert!(merged["linkedPlanServices"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn idempotent_merge() {
        let original = expanded(&plan(0)).await;
        let update = json!({ "planCostShares": { "objectId": "cs1", "objectType": "ms", "deductible": 7 } });
        let (once, _) = merge(&original, &update).unwrap();
        let (twice, _) = merge(&once, &update).unwrap();
        assert_eq!(once, twice);
    }
}
