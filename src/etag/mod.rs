//! The ETag cache: a `root objectId -> opaque token` map, authoritative for
//! conditional-write preconditions. The node store never stores ETags.

pub mod redis;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Ok,
    Mismatch,
    NotFound,
}

/// Computes the reference ETag algorithm: SHA-256 of the document's
/// canonical (sorted-key) JSON rendering, hex-encoded. Any collision
/// resistant digest is conformant; this is simply the one this
/// implementation recomputes on every mutation.
pub fn compute(expanded: &serde_json::Value) -> String {
    let canonical = canonicalize(expanded);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Renders `v` with object keys sorted, so two structurally-equal documents
/// always hash the same way regardless of field insertion order.
fn canonicalize(v: &serde_json::Value) -> String {
    use serde_json::Value;
    match v {
        Value::Object(m) => {
            let mut keys: Vec<&String> = m.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).expect("string serializes"));
                out.push(':');
                out.push_str(&canonicalize(&m[*k]));
            }
            out.push('}');
            out
        }
        Value::Array(arr) => {
            let mut out = String::from("[");
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(item));
            }
            out.push(']');
            out
        }
        other => other.to_string(),
    }
}

/// Backend contract for the ETag cache.
#[async_trait]
pub trait EtagCache: Send + Sync {
    async fn set(&self, id: &str, etag: &str) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<String>>;
    async fn delete(&self, id: &str) -> Result<()>;

    /// Atomically checks `candidate` against the stored value. Must be a
    /// single compare-and-set so two concurrent updates racing on the same
    /// document resolve to exactly one winner.
    async fn check(&self, id: &str, candidate: &str) -> Result<CheckResult> {
        match self.get(id).await? {
            None => Ok(CheckResult::NotFound),
            Some(current) if current == candidate => Ok(CheckResult::Ok),
            Some(_) => Ok(CheckResult::Mismatch),
        }
    }

    /// Atomically sets `id` to `new` iff its current value is `expected`.
    /// This is the primitive that linearizes two racing updates on the same
    /// document: exactly one caller observes `Ok`. The default
    /// implementation is a plain get-then-set and is **not** atomic; real
    /// backends must override it with a genuine CAS primitive.
    async fn compare_and_swap(&self, id: &str, expected: &str, new: &str) -> Result<CheckResult> {
        match self.check(id, expected).await? {
            CheckResult::Ok => {
                self.set(id, new).await?;
                Ok(CheckResult::Ok)
            }
            other => Ok(other),
        }
    }
}

/// In-memory ETag cache for tests. `check` is a single critical section
/// guarded by the map's own lock, giving the same atomicity guarantee a
/// real backend's CAS primitive would.
#[derive(Default)]
pub struct MemoryEtagCache {
    inner: tokio::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl MemoryEtagCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EtagCache for MemoryEtagCache {
    async fn set(&self, id: &str, etag: &str) -> Result<()> {
        self.inner.lock().await.insert(id.to_owned(), etag.to_owned());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.lock().await.remove(id);
        Ok(())
    }

    async fn check(&self, id: &str, candidate: &str) -> Result<CheckResult> {
        let guard = self.inner.lock().await;
        Ok(match guard.get(id) {
            None => CheckResult::NotFound,
            Some(current) if current == candidate => CheckResult::Ok,
            Some(_) => CheckResult::Mismatch,
        })
    }

    async fn compare_and_swap(&self, id: &str, expected: &str, new: &str) -> Result<CheckResult> {
        let mut guard = self.inner.lock().await;
        Ok(match guard.get(id) {
            None => CheckResult::NotFound,
            Some(current) if current == expected => {
                guard.insert(id.to_owned(), new.to_owned());
                CheckResult::Ok
            }
            Some(_) => CheckResult::Mismatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn etag_changes_iff_document_changes() {
        let a = json!({"objectId": "p1", "objectType": "plan", "x": 1});
        let b = json!({"objectId": "p1", "objectType": "plan", "x": 2});
        let a2 = json!({"x": 1, "objectType": "plan", "objectId": "p1"});

        assert_ne!(compute(&a), compute(&b));
        assert_eq!(compute(&a), compute(&a2));
    }
}
