use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ResponseFormat;

use super::batch::EvaluationBatch;

/// Score for one transformation, in the verbose shape regardless of the
/// format the service answered in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationScore {
    pub chunk_id: String,
    /// 1 to 10
    pub adversarial_effectiveness: f64,
    #[serde(default)]
    pub notes: String,
    /// Per-criterion rubric text, verbose responses only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<serde_json::Value>,
}

/// Scored result of one batch. Never mutated after evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub batch_id: String,
    pub session_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub format: ResponseFormat,
    pub scores: Vec<TransformationScore>,
    pub scored_count: usize,
    pub sampled_count: usize,
    pub total_count: usize,
    pub average_score: f64,
    pub passed: bool,
    /// Set when the batch failed closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl EvaluationReport {
    /// Nothing was selected for scoring.
    pub fn trivially_passing(batch: &EvaluationBatch, format: ResponseFormat) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            session_id: batch.session_id.clone(),
            evaluated_at: Utc::now(),
            format,
            scores: Vec::new(),
            scored_count: 0,
            sampled_count: 0,
            total_count: batch.transformations.len(),
            average_score: 0.0,
            passed: true,
            failure: None,
        }
    }

    /// Zero scored items and a failure note.
    pub fn failed(
        batch: &EvaluationBatch,
        format: ResponseFormat,
        sampled_count: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            session_id: batch.session_id.clone(),
            evaluated_at: Utc::now(),
            format,
            scores: Vec::new(),
            scored_count: 0,
            sampled_count,
            total_count: batch.transformations.len(),
            average_score: 0.0,
            passed: false,
            failure: Some(reason.into()),
        }
    }

    pub fn scored(
        batch: &EvaluationBatch,
        format: ResponseFormat,
        sampled_count: usize,
        scores: Vec<TransformationScore>,
        average_score: f64,
        pass_threshold: f64,
    ) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            session_id: batch.session_id.clone(),
            evaluated_at: Utc::now(),
            format,
            scored_count: scores.len(),
            scores,
            sampled_count,
            total_count: batch.transformations.len(),
            average_score,
            passed: average_score >= pass_threshold,
            failure: None,
        }
    }
}
