use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dom::ElementHandle;
use crate::transform::TransformType;

/// One transformable region of the rendered document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentChunk {
    pub id: String,
    pub content_hash: String,
    /// Owned by the document; check liveness before use
    pub element: ElementHandle,
    pub tag: String,
    /// Original text, never changed after registration
    pub base_content: String,
    pub current_content: String,
    pub transform_count: u32,
    pub last_transform_type: Option<TransformType>,
    pub last_rewrite_level: Option<u8>,
    pub is_visible: bool,
    pub word_count: usize,
}

impl ContentChunk {
    pub fn new(id: String, content_hash: String, element: ElementHandle, tag: &str, text: &str) -> Self {
        Self {
            id,
            content_hash,
            element,
            tag: tag.to_string(),
            base_content: text.to_string(),
            current_content: text.to_string(),
            transform_count: 0,
            last_transform_type: None,
            last_rewrite_level: None,
            is_visible: false,
            word_count: word_count(text),
        }
    }

    pub fn is_transformed(&self) -> bool {
        self.current_content != self.base_content
    }
}

/// Hex SHA-256 of the whitespace-collapsed text, truncated to 16 chars.
pub fn content_hash(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(collapsed.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Stable chunk id: element tag plus the leading hash chars.
pub fn chunk_id(tag: &str, content_hash: &str) -> String {
    let short = content_hash.get(..8).unwrap_or(content_hash);
    format!("{}-{}", tag.to_ascii_lowercase(), short)
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_whitespace_layout() {
        assert_eq!(
            content_hash("The  results\nhave been published."),
            content_hash("The results have been published.")
        );
        assert_ne!(content_hash("one"), content_hash("two"));
        assert_eq!(content_hash("anything").len(), 16);
    }

    #[test]
    fn id_combines_tag_and_hash() {
        let hash = content_hash("hello world");
        let id = chunk_id("P", &hash);
        assert!(id.starts_with("p-"));
        assert_eq!(id.len(), 10);
    }

    #[test]
    fn id_tolerates_short_or_non_ascii_hashes() {
        assert_eq!(chunk_id("p", "abc"), "p-abc");
        // Byte 8 falls inside a multi-byte char
        assert_eq!(chunk_id("p", "abcdefgé12"), "p-abcdefgé12");
        assert_eq!(chunk_id("p", "abcdefgh12"), "p-abcdefgh");
    }

    #[test]
    fn new_chunk_is_untransformed() {
        let chunk = ContentChunk::new("p-1".into(), "h".into(), ElementHandle(1), "p", "a b c");
        assert_eq!(chunk.word_count, 3);
        assert!(!chunk.is_transformed());
    }
}
