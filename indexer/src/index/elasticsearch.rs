//! Bulk client for Elasticsearch compatible search clusters.

use std::time::Duration;

use config::shared::IndexConfig;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};
use crate::index::{BulkResponse, IndexAction, IndexClient};

/// Response body of the `_bulk` endpoint.
#[derive(Debug, Deserialize)]
struct BulkResponseBody {
    errors: bool,
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

/// Search index client speaking the Elasticsearch REST protocol.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
    index_settings: Option<Value>,
}

impl ElasticsearchClient {
    pub fn new(config: &IndexConfig) -> IndexerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            index_settings: config.index_settings.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}/{path}", self.base_url));

        match &self.username {
            Some(username) => request.basic_auth(
                username,
                self.password
                    .as_ref()
                    .map(|password| password.expose_secret().to_owned()),
            ),
            None => request,
        }
    }

    async fn index_exists(&self, index: &str) -> IndexerResult<bool> {
        let response = self.request(reqwest::Method::HEAD, index).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => bail!(
                ErrorKind::IndexRequestFailed,
                "Index existence check failed",
                format!("{index}: {status}")
            ),
        }
    }
}

/// Renders actions as the newline delimited body of a `_bulk` request.
fn bulk_body(index: &str, actions: &[IndexAction]) -> IndexerResult<String> {
    let mut body = String::new();

    for action in actions {
        match action {
            IndexAction::Upsert { id, document } => {
                body.push_str(&serde_json::to_string(
                    &json!({"update": {"_index": index, "_id": id}}),
                )?);
                body.push('\n');
                body.push_str(&serde_json::to_string(
                    &json!({"doc": document, "doc_as_upsert": true}),
                )?);
                body.push('\n');
            }
            IndexAction::Delete { id } => {
                body.push_str(&serde_json::to_string(
                    &json!({"delete": {"_index": index, "_id": id}}),
                )?);
                body.push('\n');
            }
        }
    }

    Ok(body)
}

/// Counts rejected items, not counting deletes of missing documents.
fn count_failures(body: &BulkResponseBody) -> usize {
    if !body.errors {
        return 0;
    }

    body.items
        .iter()
        .flat_map(|item| item.iter())
        .filter(|(operation, item)| {
            let missing_delete =
                operation.as_str() == "delete" && item.status == StatusCode::NOT_FOUND.as_u16();
            let failed = item.error.is_some() || item.status >= 300;

            if failed && !missing_delete {
                warn!(
                    operation = operation.as_str(),
                    id = item.id.as_deref().unwrap_or("<unknown>"),
                    status = item.status,
                    error = ?item.error,
                    "bulk item rejected"
                );
            }

            failed && !missing_delete
        })
        .count()
}

impl IndexClient for ElasticsearchClient {
    fn name() -> &'static str {
        "elasticsearch"
    }

    async fn ensure_index(&self, index: &str) -> IndexerResult<()> {
        if self.index_exists(index).await? {
            return Ok(());
        }

        let settings = self.index_settings.clone().unwrap_or_else(|| json!({}));
        let response = self
            .request(reqwest::Method::PUT, index)
            .json(&settings)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                ErrorKind::IndexRequestFailed,
                "Index creation failed",
                format!("{index}: {status} {body}")
            );
        }

        info!(index, "created index");

        Ok(())
    }

    async fn drop_index(&self, index: &str) -> IndexerResult<()> {
        let response = self.request(reqwest::Method::DELETE, index).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(index, "index to drop does not exist");
                Ok(())
            }
            status if status.is_success() => {
                info!(index, "dropped index");
                Ok(())
            }
            status => bail!(
                ErrorKind::IndexRequestFailed,
                "Index deletion failed",
                format!("{index}: {status}")
            ),
        }
    }

    async fn bulk(&self, index: &str, actions: Vec<IndexAction>) -> IndexerResult<BulkResponse> {
        let items = actions.len();
        let body = bulk_body(index, &actions)?;

        let response = self
            .request(reqwest::Method::POST, "_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                ErrorKind::BulkWriteError,
                "Bulk request rejected",
                format!("{items} actions: {status} {body}")
            );
        }

        let body: BulkResponseBody = response.json().await?;
        let failed = count_failures(&body);

        Ok(BulkResponse { items, failed })
    }
}
