use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::config::ServicesConfig;
use crate::transform::TransformType;

use super::{
    ContentStore, GenerationRequest, GenerationResponse, GenerationService, PageContent,
    PageContentSource, ScoringRequest, ScoringService, StoredVersion,
};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

#[derive(Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    versions: Vec<StoredVersion>,
}

/// One client for every backend endpoint.
///
/// - `GET  {base}/content/versions?hash=&type=&level=`
/// - `GET  {base}/content/page?route=&level=` (404 means no rewrite)
/// - `POST {base}/generate`
/// - `POST {base}/evaluate` (plain-text answer)
pub struct HttpServiceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpServiceClient {
    pub fn new(config: &ServicesConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(anyhow!("services base URL is not configured"));
        }

        let mut builder = Client::builder();
        if let Some(timeout_ms) = config.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

impl std::fmt::Debug for HttpServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServiceClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl ContentStore for HttpServiceClient {
    async fn lookup(
        &self,
        content_hash: &str,
        transform_type: TransformType,
        level: Option<u8>,
    ) -> Result<Vec<StoredVersion>> {
        let mut query = vec![
            ("hash", content_hash.to_string()),
            ("type", transform_type.as_str().to_string()),
        ];
        if let Some(level) = level {
            query.push(("level", level.to_string()));
        }

        let response = self
            .authorize(self.client.get(self.url("content/versions")).query(&query))
            .send()
            .await
            .context("content store request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = response
            .error_for_status()
            .context("content store returned an error status")?;
        let body: VersionsResponse = response
            .json()
            .await
            .context("failed to parse content store response")?;
        log_debug!("content store: {} versions for {}", body.versions.len(), content_hash);
        Ok(body.versions)
    }
}

#[async_trait]
impl PageContentSource for HttpServiceClient {
    async fn fetch(&self, route: &str, level: u8) -> Result<Option<PageContent>> {
        let response = self
            .authorize(
                self.client
                    .get(self.url("content/page"))
                    .query(&[("route", route.to_string()), ("level", level.to_string())]),
            )
            .send()
            .await
            .with_context(|| format!("page content request failed for {route}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .context("page content source returned an error status")?;
        let page = response
            .json()
            .await
            .context("failed to parse page content response")?;
        Ok(Some(page))
    }
}

#[async_trait]
impl GenerationService for HttpServiceClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let started = std::time::Instant::now();
        let response = self
            .authorize(self.client.post(self.url("generate")).json(request))
            .send()
            .await
            .context("generation request failed")?
            .error_for_status()
            .context("generation service returned an error status")?;

        let mut generated: GenerationResponse = response
            .json()
            .await
            .context("failed to parse generation response")?;
        if generated.latency_ms == 0 {
            generated.latency_ms = started.elapsed().as_millis() as u64;
        }
        Ok(generated)
    }
}

#[async_trait]
impl ScoringService for HttpServiceClient {
    async fn score(&self, request: &ScoringRequest) -> Result<String> {
        let response = self
            .authorize(self.client.post(self.url("evaluate")).json(request))
            .send()
            .await
            .context("scoring request failed")?
            .error_for_status()
            .context("scoring service returned an error status")?;

        response
            .text()
            .await
            .context("failed to read scoring response body")
    }
}
