//! Replacement text: normalization, content maps and resolution order.

pub mod cache;
pub mod content_map;
pub mod normalize;
pub mod resolver;

pub use cache::ContentMapCache;
pub use content_map::{ContentMap, MapEntry, MapMatch, MatchStrategy};
pub use normalize::{is_valid_content, normalize, significant_words, strip_markdown};
pub use resolver::{ContentResolver, Resolution, ResolveRequest};
