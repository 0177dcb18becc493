use serde_json::{json, Value};

use crate::config::{EvaluationConfig, ResponseFormat};
use crate::remote::ScoringRequest;
use crate::transform::TransformationRecord;

use super::batch::EvaluationBatch;

const COMPACT_INSTRUCTIONS: &str = "Score each transformation from 1 to 10 for adversarial \
effectiveness: how well the replacement keeps the original facts and tone while reading \
naturally in place. Reply with JSON only, shaped as \
{\"scores\": [{\"chunkId\": string, \"score\": number, \"note\": string}], \"averageScore\": number}.";

const VERBOSE_INSTRUCTIONS: &str = "Review each transformation against the rubric: factual \
preservation, tonal fit, fluency in context and how noticeable the change is. For every \
transformation give a short assessment per criterion and an overall adversarial effectiveness \
score from 1 to 10. Reply with JSON only, shaped as \
{\"transformations\": [{\"chunkId\": string, \"criteria\": {\"factualPreservation\": string, \
\"tonalFit\": string, \"fluency\": string, \"noticeability\": string}, \
\"adversarialEffectiveness\": number, \"notes\": string}], \"averageScore\": number}.";

pub fn instructions(format: ResponseFormat) -> &'static str {
    match format {
        ResponseFormat::Compact => COMPACT_INSTRUCTIONS,
        ResponseFormat::Verbose => VERBOSE_INSTRUCTIONS,
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with an
/// ellipsis.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn transformation_payload(record: &TransformationRecord, max_chars: usize) -> Value {
    json!({
        "chunkId": record.chunk_id,
        "type": record.transform_type.as_str(),
        "level": record.level,
        "source": record.source.as_str(),
        "trigger": record.trigger,
        "original": truncate(&record.original_content, max_chars),
        "transformed": truncate(&record.transformed_content, max_chars),
    })
}

/// Build the scoring request for the sampled part of a batch.
pub fn build_request(
    batch: &EvaluationBatch,
    sampled: &[TransformationRecord],
    config: &EvaluationConfig,
) -> ScoringRequest {
    let transformations: Vec<Value> = sampled
        .iter()
        .map(|record| transformation_payload(record, config.max_field_chars))
        .collect();

    ScoringRequest {
        batch_id: batch.batch_id.clone(),
        format: config.response_format,
        instructions: instructions(config.response_format).to_string(),
        payload: json!({
            "batchId": batch.batch_id,
            "sessionId": batch.session_id,
            "transformations": transformations,
            "interactions": batch.interactions,
            "visitor": batch.visitor,
        }),
    }
}
