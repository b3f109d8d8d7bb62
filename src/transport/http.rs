//! HTTP client for a remote engine exposing the transport contract as a
//! flat JSON REST dialect under `/1/`.

use crate::bulk::{BulkAction, BulkOutcome};
use crate::config::GriddleConfig;
use crate::error::{GriddleError, Result};
use crate::transport::{AliasAction, PutResponse, ScanPage, SearchTransport};
use crate::types::{ConcreteName, DocKey, Document, IndexDefinition, WriteCondition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Structured error body returned by the engine.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(default)]
    index: Option<String>,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    expected: Option<String>,
    #[serde(default)]
    actual: Option<String>,
}

#[derive(Serialize)]
struct PutBody<'a> {
    payload: &'a serde_json::Value,
    condition: WriteCondition,
}

#[derive(Serialize)]
struct ConditionBody {
    condition: WriteCondition,
}

#[derive(Serialize)]
struct BulkBody<'a> {
    actions: &'a [BulkAction],
}

#[derive(Deserialize)]
struct BulkResponse {
    outcomes: Vec<BulkOutcome>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: usize,
}

#[derive(Deserialize)]
struct IndexList {
    indexes: Vec<ConcreteName>,
}

#[derive(Deserialize)]
struct AliasBinding {
    index: ConcreteName,
}

#[derive(Serialize)]
struct AliasBody<'a> {
    actions: &'a [AliasAction],
}

/// Transport over HTTP.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_config(base_url, &GriddleConfig::default())
    }

    pub fn with_config(base_url: impl Into<String>, config: &GriddleConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        HttpTransport { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Pass a successful response through; turn anything else into the
    /// matching `GriddleError` via the engine's structured error body.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: Option<ErrorBody> = response.json().await.ok();
        Err(match body {
            Some(body) => match body.error.as_str() {
                "index_already_exists" => {
                    GriddleError::IndexAlreadyExists(body.index.unwrap_or(body.message))
                }
                "index_not_found" => GriddleError::IndexMissing(body.index.unwrap_or(body.message)),
                "alias_not_found" => GriddleError::AliasNotFound(body.alias.unwrap_or(body.message)),
                "alias_swap_conflict" => GriddleError::AliasSwapConflict {
                    alias: body.alias.unwrap_or_default(),
                    expected: body.expected.unwrap_or_default(),
                    actual: body.actual.unwrap_or_default(),
                },
                "invalid_definition" => GriddleError::InvalidDefinition(body.message),
                _ => GriddleError::Transport(format!("{}: {}", status, body.message)),
            },
            None => GriddleError::Transport(format!("engine returned {}", status)),
        })
    }
}

#[async_trait]
impl SearchTransport for HttpTransport {
    async fn create_index(&self, name: &str, definition: &IndexDefinition) -> Result<()> {
        let url = self.url(&format!("/1/indexes/{}", name));
        let response = self.client.put(&url).json(definition).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let url = self.url(&format!("/1/indexes/{}", name));
        let response = self.client.delete(&url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let url = self.url(&format!("/1/indexes/{}", name));
        let response = self.client.head(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<ConcreteName>> {
        let url = self.url("/1/indexes");
        let response = self
            .client
            .get(&url)
            .query(&[("prefix", prefix)])
            .send()
            .await?;
        let list: IndexList = Self::check(response).await?.json().await?;
        Ok(list.indexes)
    }

    async fn get(&self, index: &str, key: &DocKey) -> Result<Option<Document>> {
        let url = self.url(&format!(
            "/1/indexes/{}/docs/{}/{}",
            index, key.doc_type, key.id
        ));
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // Distinguish "document absent" from "index gone".
            let body: Option<ErrorBody> = response.json().await.ok();
            return match body {
                Some(body) if body.error == "index_not_found" => {
                    Err(GriddleError::IndexMissing(body.index.unwrap_or(body.message)))
                }
                _ => Ok(None),
            };
        }
        let doc: Document = Self::check(response).await?.json().await?;
        Ok(Some(doc))
    }

    async fn put(
        &self,
        index: &str,
        doc: &Document,
        condition: WriteCondition,
    ) -> Result<PutResponse> {
        let url = self.url(&format!(
            "/1/indexes/{}/docs/{}/{}",
            index, doc.key.doc_type, doc.key.id
        ));
        let body = PutBody {
            payload: &doc.payload,
            condition,
        };
        let response = self.client.put(&url).json(&body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete(
        &self,
        index: &str,
        key: &DocKey,
        condition: WriteCondition,
    ) -> Result<PutResponse> {
        let url = self.url(&format!(
            "/1/indexes/{}/docs/{}/{}",
            index, key.doc_type, key.id
        ));
        let body = ConditionBody { condition };
        let response = self.client.delete(&url).json(&body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn count(&self, index: &str) -> Result<usize> {
        let url = self.url(&format!("/1/indexes/{}/count", index));
        let response = self.client.get(&url).send().await?;
        let counted: CountResponse = Self::check(response).await?.json().await?;
        Ok(counted.count)
    }

    async fn bulk(&self, index: &str, actions: &[BulkAction]) -> Result<Vec<BulkOutcome>> {
        let url = self.url(&format!("/1/indexes/{}/batch", index));
        let body = BulkBody { actions };
        let response = self.client.post(&url).json(&body).send().await?;
        let bulk: BulkResponse = Self::check(response).await?.json().await?;
        if bulk.outcomes.len() != actions.len() {
            return Err(GriddleError::Transport(format!(
                "bulk returned {} outcomes for {} actions",
                bulk.outcomes.len(),
                actions.len()
            )));
        }
        Ok(bulk.outcomes)
    }

    async fn scan(&self, index: &str, cursor: Option<&str>, limit: usize) -> Result<ScanPage> {
        let url = self.url(&format!("/1/indexes/{}/scan", index));
        let mut request = self
            .client
            .get(&url)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = request.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<ConcreteName>> {
        let url = self.url(&format!("/1/aliases/{}", alias));
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let binding: AliasBinding = Self::check(response).await?.json().await?;
        Ok(Some(binding.index))
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let url = self.url("/1/aliases");
        let body = AliasBody { actions };
        let response = self.client.post(&url).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
