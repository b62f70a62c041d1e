//! Elasticsearch/OpenSearch-backed [`SearchIndex`], talking straight to the
//! document HTTP API rather than through a heavyweight client crate.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{Error, Result};

use super::index_writer::{index_mapping, SearchIndex};

pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
}

impl ElasticsearchIndex {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn index_document(&self, index: &str, id: &str, routing: &str, body: Value) -> Result<()> {
        let url = format!("{}/{}/_doc/{}?routing={}", self.base_url, index, id, routing);
        let response = self.client.put(&url).json(&body).send().await.map_err(|e| Error::StorageError {
            message: format!("indexing document {id}: {e}"),
        })?;
        ensure_success(response.status(), "index")
    }

    async fn delete_document(&self, index: &str, id: &str) -> Result<()> {
        let url = format!("{}/{}/_doc/{}", self.base_url, index, id);
        let response = self.client.delete(&url).send().await.map_err(|e| Error::StorageError {
            message: format!("deleting document {id}: {e}"),
        })?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()), // already gone; delete is idempotent
            status => ensure_success(status, "delete"),
        }
    }

    async fn ensure_index(&self, index: &str) -> Result<()> {
        let url = format!("{}/{}", self.base_url, index);
        let exists = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| Error::StorageError {
                message: format!("checking index {index}: {e}"),
            })?
            .status()
            == StatusCode::OK;

        if exists {
            return Ok(());
        }

        let response = self
            .client
            .put(&url)
            .json(&index_mapping())
            .send()
            .await
            .map_err(|e| Error::StorageError {
                message: format!("creating index {index}: {e}"),
            })?;
        ensure_success(response.status(), "create index")
    }
}

fn ensure_success(status: StatusCode, op: &str) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::StorageError {
            message: format!("{op} returned status {status}"),
        })
    }
}
