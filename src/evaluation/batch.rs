use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transform::TransformationRecord;

/// Condensed interaction history sent alongside a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InteractionSummary {
    pub session_duration_ms: u64,
    pub mode_changes: u32,
    pub expand_episodes: u32,
    pub rewrite_episodes: u32,
    pub max_rewrite_level: u8,
}

/// Minimal visitor/device metadata. Never carries identifying data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisitorMeta {
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl Default for VisitorMeta {
    fn default() -> Self {
        Self {
            device: "unknown".into(),
            viewport_width: None,
            locale: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationBatch {
    pub batch_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub transformations: Vec<TransformationRecord>,
    pub interactions: InteractionSummary,
    pub visitor: VisitorMeta,
}

impl EvaluationBatch {
    pub fn new(
        session_id: impl Into<String>,
        transformations: Vec<TransformationRecord>,
        interactions: InteractionSummary,
        visitor: VisitorMeta,
    ) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            created_at: Utc::now(),
            transformations,
            interactions,
            visitor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transformations.is_empty()
    }
}
