//! The plan service: the transactional envelope around validate -> merge ->
//! store -> publish (§4.4). This is where the store mutation is ordered
//! before its publishes, where the refCount reconciliation decision from the
//! design notes' Open Question is made, and where the ETag CAS is the single
//! point that linearizes two racing updates on the same document.

use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use crate::bus::envelope::{Action, PlanNodeMessage};
use crate::bus::publisher::Publisher;
use crate::error::{Error, Result};
use crate::etag::{self, CheckResult, EtagCache};
use crate::graph::{extractor::extract, merger::merge, NodeMap};
use crate::schema_gate;
use crate::store::NodeStore;

const ROOT_TYPE: &str = "plan";

pub struct PlanService {
    store: Arc<dyn NodeStore>,
    etags: Arc<dyn EtagCache>,
    publisher: Arc<dyn Publisher>,
}

impl PlanService {
    pub fn new(store: Arc<dyn NodeStore>, etags: Arc<dyn EtagCache>, publisher: Arc<dyn Publisher>) -> Self {
        Self { store, etags, publisher }
    }

    #[instrument(skip(self, payload))]
    pub async fn create(&self, payload: Value) -> Result<(Value, String)> {
        schema_gate::validate(&payload)?;

        let object_id = payload
            .get("objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::SchemaValidation {
                message: "objectId is required".to_owned(),
            })?
            .to_owned();

        if self.store.exists(&object_id).await? {
            return Err(Error::PlanExists { object_id });
        }

        let nodes = extract(ROOT_TYPE, &payload)?;
        self.store.store_nodes(&nodes).await?;
        self.publish_all(Action::Create, &nodes).await?;

        let expanded = self.store.get_expanded_node(&object_id).await?;
        let tag = etag::compute(&expanded);
        self.etags.set(&object_id, &tag).await?;

        Ok((expanded, tag))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, object_id: &str) -> Result<(Value, String)> {
        let expanded = self.fetch_expanded(object_id).await?;
        let tag = self.etags.get(object_id).await?.ok_or_else(|| Error::PlanNotFound {
            object_id: object_id.to_owned(),
        })?;
        Ok((expanded, tag))
    }

    #[instrument(skip(self, partial))]
    pub async fn update(&self, object_id: &str, partial: Value, if_match: Option<&str>) -> Result<(Value, String)> {
        let if_match = if_match.ok_or(Error::EtagRequired)?;

        let current_tag = self.etags.get(object_id).await?.ok_or_else(|| Error::PlanNotFound {
            object_id: object_id.to_owned(),
        })?;
        if current_tag != if_match {
            return Err(Error::EtagMismatch);
        }

        let original = self.fetch_expanded(object_id).await?;
        let old_nodes = extract(ROOT_TYPE, &original)?;

        let (merged, to_delete) = merge(&original, &partial)?;
        schema_gate::validate(&merged)?;

        let mut new_nodes = extract(ROOT_TYPE, &merged)?;
        self.pin_unchanged_ref_counts(&old_nodes, &mut new_nodes).await?;

        self.store.store_nodes(&new_nodes).await?;
        if !to_delete.is_empty() {
            self.store.delete_graph_nodes(&to_delete).await?;
        }

        self.publish_all(Action::Update, &new_nodes).await?;
        self.publish_all(Action::Delete, &to_delete).await?;

        let expanded = self.store.get_expanded_node(object_id).await?;
        let new_tag = etag::compute(&expanded);

        match self.etags.compare_and_swap(object_id, &current_tag, &new_tag).await? {
            CheckResult::Ok => Ok((expanded, new_tag)),
            CheckResult::Mismatch | CheckResult::NotFound => Err(Error::EtagMismatch),
        }
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, object_id: &str) -> Result<()> {
        if !self.store.exists(object_id).await? {
            return Err(Error::PlanNotFound {
                object_id: object_id.to_owned(),
            });
        }

        let expanded = self.fetch_expanded(object_id).await?;
        let nodes = extract(ROOT_TYPE, &expanded)?;

        self.store.delete_graph_nodes(&nodes).await?;
        self.publish_all(Action::Delete, &nodes).await?;
        self.etags.delete(object_id).await?;

        Ok(())
    }

    async fn fetch_expanded(&self, object_id: &str) -> Result<Value> {
        match self.store.get_expanded_node(object_id).await {
            Ok(v) => Ok(v),
            Err(Error::NodeNotFound { .. }) => Err(Error::PlanNotFound {
                object_id: object_id.to_owned(),
            }),
            Err(e) => Err(e),
        }
    }

    /// A node re-stored after a merge that already belonged to this root
    /// before the merge must not gain an extra reference: this attaches its
    /// current `refCount` so `StoreNodes` does a plain `$set` instead of
    /// incrementing. Nodes absent from `old_nodes` are genuinely new
    /// references and are left as-is so the store increments them.
    async fn pin_unchanged_ref_counts(&self, old_nodes: &NodeMap, new_nodes: &mut NodeMap) -> Result<()> {
        for (id, node) in new_nodes.iter_mut() {
            if old_nodes.contains_key(id) {
                if let Ok(existing) = self.store.get_node_raw(id).await {
                    if let Some(count) = existing.get(crate::graph::REF_COUNT_KEY) {
                        node.insert(crate::graph::REF_COUNT_KEY.to_owned(), count.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Publishes one event per node, in the node map's iteration order, per
    /// §5's ordering requirement. Aborts on the first publish failure —
    /// the store mutation it follows is never rolled back.
    async fn publish_all(&self, action: Action, nodes: &NodeMap) -> Result<()> {
        for (id, node) in nodes {
            let message = PlanNodeMessage::new(action, id.clone(), node.clone());
            let envelope = message.into_envelope()?;
            self.publisher.publish(envelope).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::publisher::RecordingPublisher;
    use crate::etag::MemoryEtagCache;
    use crate::store::MemoryNodeStore;
    use serde_json::json;

    fn service() -> PlanService {
        PlanService::new(
            Arc::new(MemoryNodeStore::new()),
            Arc::new(MemoryEtagCache::new()),
            Arc::new(RecordingPublisher::new()),
        )
    }

    fn sample_plan() -> Value {
        json!({
            "objectId": "p1",
            "objectType": "plan",
            "_org": "o",
            "planType": "g",
            "creationDate": "2026-01-01",
            "planCostShares": { "objectId": "cs1", "objectType": "ms", "_org": "o", "deductible": 0, "copay": 0 },
            "linkedPlanServices": []
        })
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let svc = service();
        let (_, etag1) = svc.create(sample_plan()).await.unwrap();
        let (body, etag2) = svc.get("p1").await.unwrap();
        assert_eq!(etag1, etag2);
        assert_eq!(body["planCostShares"]["objectId"], "cs1");
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let svc = service();
        svc.create(sample_plan()).await.unwrap();
        let err = svc.create(sample_plan()).await.unwrap_err();
        assert_eq!(err.code(), "PLAN_EXISTS");
    }

    #[tokio::test]
    async fn update_requires_if_match() {
        let svc = service();
        svc.create(sample_plan()).await.unwrap();
        let err = svc.update("p1", json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), "ETAG_REQUIRED");
    }

    #[tokio::test]
    async fn update_rejects_wrong_if_match() {
        let svc = service();
        svc.create(sample_plan()).await.unwrap();
        let err = svc.update("p1", json!({}), Some("bogus")).await.unwrap_err();
        assert_eq!(err.code(), "ETAG_NOT_MATCH");
    }

    #[tokio::test]
    async fn update_array_append_then_field_merge() {
        let svc = service();
        let (_, etag1) = svc.create(sample_plan()).await.unwrap();

        let append = json!({
            "linkedPlanServices": [{
                "objectId": "lps1", "objectType": "lps", "_org": "o",
                "linkedService": { "objectId": "ls1", "objectType": "s", "_org": "o", "name": "x" },
                "planserviceCostShares": { "objectId": "pcs1", "objectType": "ms", "_org": "o", "deductible": 1, "copay": 1 }
            }]
        });
        let (body2, etag2) = svc.update("p1", append, Some(&etag1)).await.unwrap();
        assert_ne!(etag1, etag2);
        assert_eq!(body2["linkedPlanServices"].as_array().unwrap().len(), 1);

        let merge_cs = json!({ "planCostShares": { "objectId": "cs1", "objectType": "ms", "_org": "o", "deductible": 5, "copay": 0 } });
        let (body3, _) = svc.update("p1", merge_cs, Some(&etag2)).await.unwrap();
        assert_eq!(body3["planCostShares"]["deductible"], 5);
        assert_eq!(body3["planCostShares"]["objectId"], "cs1");
    }

    #[tokio::test]
    async fn update_replace_child_orphans_old_id() {
        let svc = service();
        let (_, etag1) = svc.create(sample_plan()).await.unwrap();
        let replace = json!({ "planCostShares": { "objectId": "cs2", "objectType": "ms", "_org": "o", "deductible": 9, "copay": 0 } });
        let (body2, _) = svc.update("p1", replace, Some(&etag1)).await.unwrap();
        assert_eq!(body2["planCostShares"]["objectId"], "cs2");

        let err = svc.store.get_node_raw("cs1").await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[tokio::test]
    async fn delete_removes_everything_and_etag() {
        let svc = service();
        svc.create(sample_plan()).await.unwrap();
        svc.delete("p1").await.unwrap();

        let err = svc.get("p1").await.unwrap_err();
        assert_eq!(err.code(), "PLAN_NOT_FOUND");

        let err = svc.store.get_node_raw("p1").await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[tokio::test]
    async fn concurrent_updates_on_same_etag_yield_one_winner() {
        let svc = Arc::new(service());
        svc.create(sample_plan()).await.unwrap();
        let (_, etag) = svc.get("p1").await.unwrap();

        let a = json!({ "planCostShares": { "objectId": "cs1", "objectType": "ms", "_org": "o", "deductible": 1, "copay": 0 } });
        let b = json!({ "planCostShares": { "objectId": "cs1", "objectType": "ms", "_org": "o", "deductible": 2, "copay": 0 } });

        let svc_a = Arc::clone(&svc);
        let etag_a = etag.clone();
        let task_a = tokio::spawn(async move { svc_a.update("p1", a, Some(&etag_a)).await });

        let svc_b = Arc::clone(&svc);
        let etag_b = etag.clone();
        let task_b = tokio::spawn(async move { svc_b.update("p1", b, Some(&etag_b)).await });

        let (ra, rb) = (task_a.await.unwrap(), task_b.await.unwrap());
        let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        let mismatches = [&ra, &rb]
            .iter()
            .filter(|r| matches!(r, Err(e) if e.code() == "ETAG_NOT_MATCH"))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(mismatches, 1);
    }
}
