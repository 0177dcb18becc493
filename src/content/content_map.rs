use std::collections::HashMap;

use serde::Serialize;

use crate::config::MatchPolicy;

use super::normalize::{
    is_valid_content, normalize, significant_words, split_paragraphs, split_sentences,
    strip_markdown,
};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStrategy {
    Exact,
    Substring,
    WordOverlap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapEntry {
    /// Normalized original fragment
    pub key: String,
    /// Replacement as it should be displayed
    pub replacement: String,
    #[serde(skip)]
    key_words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMatch {
    pub key: String,
    pub replacement: String,
    pub strategy: MatchStrategy,
    /// Word-overlap score, 1.0 for exact and substring matches
    pub score: f64,
}

/// Lookup from normalized original fragments to their rewritten
/// counterparts for one page at one level.
///
/// Entries keep insertion order; when two candidates score the same the
/// earlier one wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMap {
    entries: Vec<MapEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    policy: MatchPolicy,
}

impl ContentMap {
    pub fn empty(policy: MatchPolicy) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            policy,
        }
    }

    /// Align `original` and `rewritten` page text, first by paragraph and
    /// then by sentence within each aligned paragraph pair.
    pub fn build(original: &str, rewritten: &str, policy: &MatchPolicy) -> Self {
        let mut map = Self::empty(policy.clone());

        let originals = split_paragraphs(&strip_markdown(original));
        let rewrites = split_paragraphs(&strip_markdown(rewritten));
        if originals.len() != rewrites.len() {
            log_debug!(
                "paragraph count differs ({} vs {}); aligning the first {}",
                originals.len(),
                rewrites.len(),
                originals.len().min(rewrites.len())
            );
        }

        for (source, target) in originals.iter().zip(rewrites.iter()) {
            map.index_pair(source, target);

            let source_sentences = split_sentences(source);
            let target_sentences = split_sentences(target);
            if source_sentences.len() > 1 && source_sentences.len() == target_sentences.len() {
                for (s, t) in source_sentences.iter().zip(target_sentences.iter()) {
                    map.index_pair(s, t);
                }
            }
        }
        map
    }

    fn index_pair(&mut self, original: &str, replacement: &str) {
        let key = normalize(original);
        if key.chars().count() < self.policy.min_key_chars {
            return;
        }
        if normalize(replacement) == key {
            return;
        }
        if self.index.contains_key(&key) {
            return;
        }

        let key_words = significant_words(&key, &self.policy);
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(MapEntry {
            key,
            replacement: replacement.trim().to_string(),
            key_words,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn get(&self, normalized_key: &str) -> Option<&str> {
        self.index
            .get(normalized_key)
            .map(|&i| self.entries[i].replacement.as_str())
    }

    /// Find a replacement for a chunk's original text. Strategies are tried
    /// in order: exact, substring, word overlap.
    pub fn resolve(&self, base_content: &str) -> Option<MapMatch> {
        let normalized = normalize(&strip_markdown(base_content));
        if normalized.is_empty() {
            return None;
        }
        let original_len = base_content.trim().chars().count();

        if let Some(&i) = self.index.get(&normalized) {
            let entry = &self.entries[i];
            if self.acceptable(&entry.replacement, original_len) {
                return Some(self.matched(entry, MatchStrategy::Exact, 1.0));
            }
        }

        if normalized.chars().count() >= self.policy.min_key_chars {
            let hit = self.entries.iter().find(|entry| {
                (normalized.contains(&entry.key) || entry.key.contains(&normalized))
                    && self.acceptable(&entry.replacement, original_len)
            });
            if let Some(entry) = hit {
                return Some(self.matched(entry, MatchStrategy::Substring, 1.0));
            }
        }

        let chunk_words = significant_words(&normalized, &self.policy);
        if chunk_words.len() < self.policy.min_significant_words {
            return None;
        }

        let mut best: Option<(&MapEntry, f64)> = None;
        for entry in &self.entries {
            let shared = chunk_words
                .iter()
                .filter(|word| entry.key_words.contains(word))
                .count();
            let denominator = chunk_words.len().max(entry.key_words.len());
            if denominator == 0 {
                continue;
            }
            let score = shared as f64 / denominator as f64;
            if score <= self.policy.overlap_threshold {
                continue;
            }
            if best.map_or(false, |(_, best_score)| score <= best_score) {
                continue;
            }
            if self.acceptable(&entry.replacement, original_len) {
                best = Some((entry, score));
            }
        }

        best.map(|(entry, score)| self.matched(entry, MatchStrategy::WordOverlap, score))
    }

    fn acceptable(&self, replacement: &str, original_len: usize) -> bool {
        let replacement_len = replacement.trim().chars().count();
        (replacement_len as f64) >= (original_len as f64) * self.policy.min_length_ratio
            && is_valid_content(replacement, &self.policy)
    }

    fn matched(&self, entry: &MapEntry, strategy: MatchStrategy, score: f64) -> MapMatch {
        MapMatch {
            key: entry.key.clone(),
            replacement: entry.replacement.clone(),
            strategy,
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy() -> MatchPolicy {
        MatchPolicy::default()
    }

    #[test]
    fn exact_match_resolves_published_results() {
        let map = ContentMap::build(
            "The results have been published.",
            "Findings are now public.",
            &policy(),
        );
        assert_eq!(map.len(), 1);

        let hit = map.resolve("The results have been published.").unwrap();
        assert_eq!(hit.strategy, MatchStrategy::Exact);
        assert_eq!(hit.replacement, "Findings are now public.");

        assert_eq!(map.resolve("results... published"), None);
    }

    #[test]
    fn build_is_deterministic() {
        let original = "## Intro\n\nThe first paragraph is long enough. It has two.\n\nSecond paragraph of the original page text.";
        let rewritten = "## Intro\n\nThe opening paragraph runs long. It holds two.\n\nAnother paragraph of the rewritten page.";
        let a = ContentMap::build(original, rewritten, &policy());
        let b = ContentMap::build(original, rewritten, &policy());
        assert_eq!(a, b);
        assert_eq!(a.entries().iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), vec![
            "the first paragraph is long enough it has two",
            "the first paragraph is long enough",
            "second paragraph of the original page text",
        ]);
    }

    #[test]
    fn short_and_unchanged_fragments_are_not_indexed() {
        let map = ContentMap::build(
            "Short one.\n\nThis paragraph stays exactly the same.",
            "Brief.\n\nThis paragraph stays exactly the same!",
            &policy(),
        );
        assert!(map.is_empty());
    }

    #[test]
    fn first_mapping_wins_for_repeated_keys() {
        let map = ContentMap::build(
            "A repeated paragraph appears here.\n\nA repeated paragraph appears here.",
            "First replacement of the paragraph.\n\nSecond replacement of the paragraph.",
            &policy(),
        );
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get("a repeated paragraph appears here"),
            Some("First replacement of the paragraph.")
        );
    }

    #[test]
    fn substring_matches_either_direction() {
        let map = ContentMap::build(
            "Researchers announced the complete findings yesterday.",
            "Yesterday the research team shared everything they found.",
            &policy(),
        );
        let hit = map
            .resolve("Researchers announced the complete findings yesterday, to applause.")
            .unwrap();
        assert_eq!(hit.strategy, MatchStrategy::Substring);
    }

    #[test]
    fn exact_match_beats_word_overlap() {
        let map = ContentMap::build(
            "Careful readers notice subtle shifts within paragraphs.\n\nCareful readers notice subtle shifts within every paragraph.",
            "Attentive people catch small changes in the text.\n\nSomething completely different is written here instead.",
            &policy(),
        );
        let hit = map
            .resolve("Careful readers notice subtle shifts within every paragraph.")
            .unwrap();
        assert_eq!(hit.strategy, MatchStrategy::Exact);
        assert_eq!(hit.replacement, "Something completely different is written here instead.");
    }

    #[test]
    fn word_overlap_prefers_first_on_ties() {
        let map = ContentMap::build(
            "Quantum computers promise faster chemistry simulations today.\n\nQuantum computers promise faster chemistry simulations tomorrow.",
            "Option one describes quantum chemistry at length.\n\nOption two describes quantum chemistry at length.",
            &policy(),
        );
        let hit = map
            .resolve("Someday quantum computers promise faster chemistry simulations overall")
            .unwrap();
        assert_eq!(hit.strategy, MatchStrategy::WordOverlap);
        assert_eq!(hit.replacement, "Option one describes quantum chemistry at length.");
    }

    #[test]
    fn short_replacements_are_rejected() {
        let map = ContentMap::build(
            "This original paragraph is fairly long and detailed.",
            "Tiny.",
            &policy(),
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.resolve("This original paragraph is fairly long and detailed."), None);
    }
}
