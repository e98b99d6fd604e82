use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::error::BackendError;
use crate::model::{AssetCategory, BackendName, Jurisdiction, RetrievedChunk};
use crate::retrieval::normalize::extract_effective_date;
use crate::retrieval::trust::is_well_formed_source;
use crate::util::sha256_text;

use super::{DocumentDiscovery, WebQa, WebQaAnswer};

#[derive(Debug, Clone)]
struct JsonEndpoint {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl JsonEndpoint {
    fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint.trim())
            .with_context(|| format!("invalid backend endpoint '{endpoint}'"))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            bail!("backend endpoint must use http or https: {endpoint}");
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            timeout,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        backend: BackendName,
        body: &Value,
    ) -> Result<T, BackendError> {
        let mut request = self.client.post(self.endpoint.clone()).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| self.transport_error(backend, &error))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| self.transport_error(backend, &error))?;

        if !status.is_success() {
            debug!(
                backend = %backend,
                status = status.as_u16(),
                body = %text,
                "backend returned error status"
            );
            return Err(BackendError::from_status(backend, status.as_u16()));
        }

        serde_json::from_str::<T>(&text)
            .map_err(|error| BackendError::malformed(backend, error.to_string()))
    }

    fn transport_error(&self, backend: BackendName, error: &reqwest::Error) -> BackendError {
        if error.is_timeout() {
            return BackendError::Timeout {
                backend,
                timeout_ms: self.timeout.as_millis() as u64,
            };
        }
        BackendError::Transport {
            backend,
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpDiscoveryBackend {
    endpoint: JsonEndpoint,
}

impl HttpDiscoveryBackend {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, api_key, timeout)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct DiscoveryResponse {
    #[serde(default, alias = "results", alias = "documents")]
    chunks: Vec<DiscoveryDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscoveryDocument {
    #[serde(default, alias = "content", alias = "snippet")]
    text: String,
    #[serde(default, alias = "source_url")]
    url: String,
    #[serde(default, alias = "source_title")]
    title: String,
    #[serde(default)]
    effective_date: Option<NaiveDate>,
    #[serde(default)]
    jurisdiction: Option<String>,
    #[serde(default)]
    asset_category: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
}

#[async_trait]
impl DocumentDiscovery for HttpDiscoveryBackend {
    async fn discover(
        &self,
        query_text: &str,
        jurisdiction: Option<Jurisdiction>,
        asset_category: Option<AssetCategory>,
    ) -> Result<Vec<RetrievedChunk>, BackendError> {
        let body = json!({
            "query": query_text,
            "jurisdiction": jurisdiction.map(|value| value.code()),
            "asset_category": asset_category.map(|value| value.as_str()),
        });
        let response = self
            .endpoint
            .post::<DiscoveryResponse>(BackendName::DocumentDiscovery, &body)
            .await?;
        Ok(discovery_chunks(response, jurisdiction, asset_category))
    }
}

fn discovery_chunks(
    response: DiscoveryResponse,
    jurisdiction: Option<Jurisdiction>,
    asset_category: Option<AssetCategory>,
) -> Vec<RetrievedChunk> {
    response
        .chunks
        .into_iter()
        .filter_map(|document| {
            let url = document.url.trim().to_string();
            if !is_well_formed_source(&url) || document.text.trim().is_empty() {
                debug!(url = %url, "discarding discovery document without usable url or text");
                return None;
            }

            let effective_date = document
                .effective_date
                .or_else(|| extract_effective_date(&document.title))
                .or_else(|| extract_effective_date(&document.text));
            let checksum = document
                .checksum
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| sha256_text(&document.text));

            Some(RetrievedChunk {
                text: document.text,
                source_url: url,
                source_title: document.title.trim().to_string(),
                effective_date,
                jurisdiction: document
                    .jurisdiction
                    .or_else(|| jurisdiction.map(|value| value.code().to_string()))
                    .unwrap_or_default(),
                asset_category: document
                    .asset_category
                    .or_else(|| asset_category.map(|value| value.as_str().to_string()))
                    .unwrap_or_default(),
                checksum,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct HttpWebQaBackend {
    endpoint: JsonEndpoint,
}

impl HttpWebQaBackend {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl WebQa for HttpWebQaBackend {
    async fn ask(
        &self,
        enhanced_query_text: &str,
        allowlist_hint: &[String],
    ) -> Result<WebQaAnswer, BackendError> {
        let body = json!({
            "query": enhanced_query_text,
            "site_hint": allowlist_hint,
        });
        let mut answer = self
            .endpoint
            .post::<WebQaAnswer>(BackendName::WebQa, &body)
            .await?;
        answer
            .candidates
            .retain(|candidate| is_well_formed_source(&candidate.url));
        Ok(answer)
    }
}
