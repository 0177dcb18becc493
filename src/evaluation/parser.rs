//! Recovery of scoring JSON from free-text service answers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::report::TransformationScore;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

static FENCED: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok());
static OBJECT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\{[\s\S]*\}").ok());

const MIN_SCORE: f64 = 1.0;
const MAX_SCORE: f64 = 10.0;

/// Scores recovered from one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScores {
    pub scores: Vec<TransformationScore>,
    pub average_score: f64,
}

/// Parse a scoring answer. `None` means nothing usable could be recovered
/// and the batch must fail closed.
pub fn parse_response(raw: &str) -> Option<ParsedScores> {
    let value = match recover_json(raw) {
        Some(value) => value,
        None => {
            log_warn!("scoring response held no recoverable JSON ({} chars)", raw.len());
            return None;
        }
    };

    let scores = extract_scores(&value);
    if scores.is_empty() {
        log_warn!("scoring response JSON carried no scores");
        return None;
    }

    let mean = scores.iter().map(|s| s.adversarial_effectiveness).sum::<f64>() / scores.len() as f64;
    let average_score = value
        .get("averageScore")
        .and_then(number)
        .map(|avg| avg.clamp(MIN_SCORE, MAX_SCORE))
        .unwrap_or(mean);

    Some(ParsedScores {
        scores,
        average_score,
    })
}

/// Try, in order: fenced blocks, the whole text, the widest brace span, then
/// the first balanced object.
pub fn recover_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();

    if let Some(fenced) = FENCED.as_ref() {
        for caps in fenced.captures_iter(trimmed) {
            if let Some(body) = caps.get(1) {
                if let Some(value) = parse_candidate(body.as_str()) {
                    return Some(value);
                }
            }
        }
    }

    if let Some(value) = parse_candidate(trimmed) {
        return Some(value);
    }

    if let Some(value) = OBJECT
        .as_ref()
        .and_then(|re| re.find(trimmed))
        .and_then(|m| parse_candidate(m.as_str()))
    {
        return Some(value);
    }

    first_balanced_object(trimmed).and_then(parse_candidate)
}

fn parse_candidate(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// First `{...}` span whose braces balance, ignoring braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_scores(value: &Value) -> Vec<TransformationScore> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map
            .get("scores")
            .or_else(|| map.get("transformations"))
            .or_else(|| map.get("results"))
        {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items.iter().filter_map(score_from_item).collect()
}

/// Normalizes both the compact (`score`, `note`) and verbose
/// (`adversarialEffectiveness`, `notes`, `criteria`) item shapes.
fn score_from_item(item: &Value) -> Option<TransformationScore> {
    let chunk_id = item
        .get("chunkId")
        .or_else(|| item.get("id"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })?;

    let score = item
        .get("adversarialEffectiveness")
        .or_else(|| item.get("score"))
        .and_then(number)?;

    let notes = item
        .get("notes")
        .or_else(|| item.get("note"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let criteria = item.get("criteria").filter(|v| !v.is_null()).cloned();

    Some(TransformationScore {
        chunk_id,
        adversarial_effectiveness: score.clamp(MIN_SCORE, MAX_SCORE),
        notes,
        criteria,
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}
