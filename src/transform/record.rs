use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransformType {
    Expand,
    Rewrite,
}

impl TransformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformType::Expand => "expand",
            TransformType::Rewrite => "rewrite",
        }
    }
}

/// Where a replacement text came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ContentSource {
    /// Aligned from the precomputed full-page rewrite
    ContentMap,
    /// Pre-authored alternate from the content store
    Pregenerated,
    /// Produced by the live generation service
    Live,
}

impl ContentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentSource::ContentMap => "contentMap",
            ContentSource::Pregenerated => "pregenerated",
            ContentSource::Live => "live",
        }
    }
}

/// One applied change. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRecord {
    pub chunk_id: String,
    pub route: String,
    #[serde(rename = "type")]
    pub transform_type: TransformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// What kicked off the cycle (`scroll`, `idle`, `level-change`, ...)
    pub trigger: String,
    pub source: ContentSource,
    pub original_content: String,
    pub transformed_content: String,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_wire_names() {
        let record = TransformationRecord {
            chunk_id: "p-1a2b3c4d".into(),
            route: "/essays/one".into(),
            transform_type: TransformType::Rewrite,
            level: Some(2),
            trigger: "idle".into(),
            source: ContentSource::ContentMap,
            original_content: "a".into(),
            transformed_content: "b".into(),
            latency_ms: 12,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "rewrite");
        assert_eq!(json["source"], "contentMap");
        assert_eq!(json["chunkId"], "p-1a2b3c4d");

        let back: TransformationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
