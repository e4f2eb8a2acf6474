//! Weaviate REST adapter for [`MailIndex`](super::MailIndex)
//!
//! Thin wrapper over the Weaviate HTTP API: schema creation for the
//! multi-tenant mail collection, tenant registration, and bulk object
//! import. Each worker owns its own adapter instance (and HTTP client);
//! only the provisioned-tenant cache is shared across workers.
//!
//! Schema notes:
//! - Optional filter fields default to `filter_mailbox` and `filter_folder`.
//!   To add or rename one, update [`OPTIONAL_FILTER_FIELDS`] and make sure
//!   parsing populates `Mail.extra_filters["filter_<name>"]`; an existing
//!   collection must be recreated for a breaking schema change.
//! - The vectorizer module comes from the embedding provider in config.
//!   Vectors are generated server-side; objects are imported without them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mailsink_common::error::{MailError, Result};
use mailsink_common::types::Mail;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{ImportOutcome, MailIndex};
use crate::config::WeaviateConfig;

/// Timeout for any single Weaviate request.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Required collection properties, always present.
const BASE_PROPERTIES: &[&str] = &[
    "filter_user_id",
    "filter_year",
    "filter_month",
    "filter_day",
    "mail_id",
    "search_mail_content",
    "search_mail_header",
];

/// Optional `filter_*` properties; edit this list to adjust the schema.
const OPTIONAL_FILTER_FIELDS: &[&str] = &["filter_mailbox", "filter_folder"];

/// Set of tenants already registered, shared by every adapter instance so
/// workers do not re-issue provisioning calls for the same domain.
pub type TenantCache = Arc<Mutex<HashSet<String>>>;

/// Build an empty shared tenant cache.
pub fn tenant_cache() -> TenantCache {
    Arc::new(Mutex::new(HashSet::new()))
}

/// One worker's connection to Weaviate.
pub struct WeaviateIndex {
    http: reqwest::Client,
    config: Arc<WeaviateConfig>,
    tenants: TenantCache,
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    #[serde(default)]
    classes: Vec<SchemaClass>,
}

#[derive(Debug, Deserialize)]
struct SchemaClass {
    class: String,
}

#[derive(Debug, Deserialize)]
struct BatchObjectStatus {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    result: Option<BatchObjectResult>,
}

#[derive(Debug, Deserialize)]
struct BatchObjectResult {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<BatchErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorMessage {
    #[serde(default)]
    message: String,
}

impl WeaviateIndex {
    /// Build an adapter with its own HTTP client.
    pub fn new(config: Arc<WeaviateConfig>, tenants: TenantCache) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(MailError::index)?;
        Ok(Self {
            http,
            config,
            tenants,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/{}", self.config.host.trim_end_matches('/'), path);
        let mut request = self.http.request(method, url);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        request
    }

    fn lock_tenants(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.tenants.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn collection_payload(&self) -> serde_json::Value {
        let vectorizer = self.config.embedding.provider.vectorizer();
        let properties: Vec<serde_json::Value> = BASE_PROPERTIES
            .iter()
            .chain(OPTIONAL_FILTER_FIELDS.iter())
            .map(|name| json!({ "name": name, "dataType": ["text"] }))
            .collect();
        json!({
            "class": self.config.collection_name,
            "vectorizer": vectorizer,
            "moduleConfig": {
                vectorizer: {
                    "model": self.config.embedding.model,
                    "dimensions": self.config.embedding.vector_dimensions,
                }
            },
            "multiTenancyConfig": { "enabled": true },
            "properties": properties,
        })
    }
}

#[async_trait]
impl MailIndex for WeaviateIndex {
    async fn ensure_collection(&self) -> Result<()> {
        let response = self
            .request(Method::GET, "schema")
            .send()
            .await
            .map_err(MailError::index)?;
        if !response.status().is_success() {
            return Err(MailError::Index(format!(
                "schema read failed: {}",
                response.status()
            )));
        }
        let schema: SchemaResponse = response.json().await.map_err(MailError::index)?;
        if schema
            .classes
            .iter()
            .any(|c| c.class == self.config.collection_name)
        {
            return Ok(());
        }

        let response = self
            .request(Method::POST, "schema")
            .json(&self.collection_payload())
            .send()
            .await
            .map_err(MailError::index)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Index(format!(
                "collection create failed: {status}: {body}"
            )));
        }
        info!(collection = %self.config.collection_name, "Created mail collection");
        Ok(())
    }

    async fn ensure_tenant(&self, domain: &str) -> Result<()> {
        if domain.is_empty() {
            return Ok(());
        }
        if self.lock_tenants().contains(domain) {
            return Ok(());
        }

        let path = format!("schema/{}/tenants", self.config.collection_name);
        let result = self
            .request(Method::POST, &path)
            .json(&json!([{ "name": domain }]))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(tenant = domain, "Registered tenant");
            },
            // The tenant most likely exists already; the import call will
            // surface a real provisioning problem.
            Ok(response) => {
                debug!(tenant = domain, status = %response.status(), "Tenant add not accepted");
            },
            Err(e) => {
                debug!(tenant = domain, error = %e, "Tenant add request failed");
            },
        }
        self.lock_tenants().insert(domain.to_string());
        Ok(())
    }

    async fn import_batch(&self, mails: &[Mail]) -> Result<ImportOutcome> {
        if mails.is_empty() {
            return Ok(ImportOutcome::default());
        }

        let domains: HashSet<&str> = mails.iter().map(|m| m.domain.as_str()).collect();
        for domain in domains {
            self.ensure_tenant(domain).await?;
        }

        let objects: Vec<serde_json::Value> = mails
            .iter()
            .map(|mail| {
                json!({
                    "class": self.config.collection_name,
                    "id": mail.mail_id,
                    "tenant": mail.domain,
                    "properties": mail.index_properties(),
                })
            })
            .collect();

        let response = self
            .request(Method::POST, "batch/objects")
            .json(&json!({ "objects": objects }))
            .send()
            .await
            .map_err(MailError::index)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Index(format!(
                "batch import failed: {status}: {body}"
            )));
        }

        let statuses: Vec<BatchObjectStatus> =
            response.json().await.map_err(MailError::index)?;
        let mut failed: HashMap<String, String> = HashMap::new();
        for status in statuses {
            let Some(id) = status.id else { continue };
            let message = status
                .result
                .and_then(|r| r.errors)
                .and_then(|e| e.error.into_iter().next())
                .map(|e| e.message);
            if let Some(message) = message {
                failed.insert(
                    id,
                    if message.is_empty() {
                        "batch failed".to_string()
                    } else {
                        message
                    },
                );
            }
        }

        // Any record not reported failed is treated as succeeded.
        let success_ids = mails
            .iter()
            .filter(|m| !failed.contains_key(&m.mail_id))
            .map(|m| m.mail_id.clone())
            .collect();

        Ok(ImportOutcome {
            success_ids,
            failed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, EmbeddingProvider};

    fn config() -> Arc<WeaviateConfig> {
        Arc::new(WeaviateConfig {
            host: "http://localhost:8080".to_string(),
            api_key: None,
            collection_name: "MailDoc".to_string(),
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::Ollama,
                model: "nomic-embed-text".to_string(),
                vector_dimensions: 768,
            },
        })
    }

    #[test]
    fn test_collection_payload_shape() {
        let index = WeaviateIndex::new(config(), tenant_cache()).unwrap();
        let payload = index.collection_payload();

        assert_eq!(payload["class"], "MailDoc");
        assert_eq!(payload["vectorizer"], "text2vec-ollama");
        assert_eq!(payload["multiTenancyConfig"]["enabled"], true);
        assert_eq!(
            payload["moduleConfig"]["text2vec-ollama"]["model"],
            "nomic-embed-text"
        );

        let names: Vec<&str> = payload["properties"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"mail_id"));
        assert!(names.contains(&"search_mail_content"));
        assert!(names.contains(&"filter_mailbox"));
        assert!(names.contains(&"filter_folder"));
    }
}
