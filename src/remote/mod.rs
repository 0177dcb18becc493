//! Services the engine consumes but does not own: the pre-authored content
//! store, the full-page rewrite source, live generation and scoring.
//!
//! Every call may fail. Callers log and degrade, they never surface these
//! errors to the page.

mod fixed;
mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ResponseFormat;
use crate::transform::TransformType;

pub use fixed::{FixedContentStore, FixedGenerationService, FixedPageSource, FixedScoringService};
pub use http::HttpServiceClient;

/// One pre-authored alternate with the score it earned when it was produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredVersion {
    pub text: String,
    pub score: f64,
}

/// Original and fully rewritten text of one page at one level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub original: String,
    pub rewritten: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub text: String,
    #[serde(rename = "type")]
    pub transform_type: TransformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// How long the reader has been idle, for rewrites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub text: String,
    #[serde(default)]
    pub latency_ms: u64,
}

/// Payload handed to the scoring service. The instructions are opaque to
/// the engine; only the shape of the answer matters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoringRequest {
    pub batch_id: String,
    pub format: ResponseFormat,
    pub instructions: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stored alternates for a content hash. An empty list is not an error.
    async fn lookup(
        &self,
        content_hash: &str,
        transform_type: TransformType,
        level: Option<u8>,
    ) -> Result<Vec<StoredVersion>>;
}

#[async_trait]
pub trait PageContentSource: Send + Sync {
    /// `None` when no rewrite exists for this route and level.
    async fn fetch(&self, route: &str, level: u8) -> Result<Option<PageContent>>;
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

#[async_trait]
pub trait ScoringService: Send + Sync {
    /// Raw response text. It is expected to contain JSON, possibly wrapped
    /// in commentary.
    async fn score(&self, request: &ScoringRequest) -> Result<String>;
}
