use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::chunks::ContentChunk;
use crate::config::{MatchPolicy, OrchestratorConfig};
use crate::remote::{ContentStore, GenerationRequest, GenerationService, PageContentSource};
use crate::transform::{ContentSource, TransformType};

use super::cache::ContentMapCache;
use super::content_map::ContentMap;
use super::normalize::is_valid_content;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub chunk: &'a ContentChunk,
    pub route: &'a str,
    pub transform_type: TransformType,
    pub level: Option<u8>,
    pub idle_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub text: String,
    pub source: ContentSource,
}

/// Finds replacement text for a chunk.
///
/// Rewrites try the page's content map, then the content store, then live
/// generation. Expansions skip the map. Every failure along the way is
/// logged and the next source is tried; `None` means skip the chunk.
pub struct ContentResolver {
    policy: MatchPolicy,
    min_version_score: f64,
    live_generation: bool,
    cache: ContentMapCache,
    pages: Arc<dyn PageContentSource>,
    store: Arc<dyn ContentStore>,
    generator: Option<Arc<dyn GenerationService>>,
    rng: Mutex<StdRng>,
}

impl ContentResolver {
    pub fn new(
        config: &OrchestratorConfig,
        pages: Arc<dyn PageContentSource>,
        store: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            policy: config.match_policy.clone(),
            min_version_score: config.min_version_score,
            live_generation: config.live_generation,
            cache: ContentMapCache::new(Duration::from_secs(config.content_map_ttl_secs)),
            pages,
            store,
            generator: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationService>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub async fn resolve(&self, request: ResolveRequest<'_>) -> Option<Resolution> {
        if request.transform_type == TransformType::Rewrite {
            let level = request.level.unwrap_or(1);
            if let Some(map) = self.content_map(request.route, level).await {
                if let Some(hit) = map.resolve(&request.chunk.base_content) {
                    log_debug!(
                        "chunk {} matched content map ({:?}, score {:.2})",
                        request.chunk.id,
                        hit.strategy,
                        hit.score
                    );
                    return Some(Resolution {
                        text: hit.replacement,
                        source: ContentSource::ContentMap,
                    });
                }
            }
        }

        if let Some(text) = self.from_store(&request).await {
            return Some(Resolution {
                text,
                source: ContentSource::Pregenerated,
            });
        }

        if let Some(text) = self.from_live(&request).await {
            return Some(Resolution {
                text,
                source: ContentSource::Live,
            });
        }

        log_debug!(
            "no {} content for chunk {} on {}",
            request.transform_type.as_str(),
            request.chunk.id,
            request.route
        );
        None
    }

    /// Cached map for the route and level. A route without a rewrite is
    /// cached as an empty map; a failed fetch is not cached.
    pub async fn content_map(&self, route: &str, level: u8) -> Option<Arc<ContentMap>> {
        if let Some(map) = self.cache.get(route, level) {
            return Some(map);
        }

        match self.pages.fetch(route, level).await {
            Ok(Some(page)) => {
                let map = ContentMap::build(&page.original, &page.rewritten, &self.policy);
                log_debug!("built content map for {} level {} ({} entries)", route, level, map.len());
                Some(self.cache.insert(route, level, map))
            }
            Ok(None) => {
                log_debug!("no rewrite for {} level {}", route, level);
                Some(self.cache.insert(route, level, ContentMap::empty(self.policy.clone())))
            }
            Err(err) => {
                log_warn!("content map fetch failed for {} level {}: {err:#}", route, level);
                None
            }
        }
    }

    async fn from_store(&self, request: &ResolveRequest<'_>) -> Option<String> {
        let level = match request.transform_type {
            TransformType::Rewrite => Some(request.level.unwrap_or(1)),
            TransformType::Expand => None,
        };

        let versions = match self
            .store
            .lookup(&request.chunk.content_hash, request.transform_type, level)
            .await
        {
            Ok(versions) => versions,
            Err(err) => {
                log_warn!("content store lookup failed for {}: {err:#}", request.chunk.id);
                return None;
            }
        };

        let passing: Vec<_> = versions
            .into_iter()
            .filter(|version| {
                version.score >= self.min_version_score && is_valid_content(&version.text, &self.policy)
            })
            .collect();

        let mut rng = self.lock_rng();
        passing.choose(&mut *rng).map(|version| version.text.clone())
    }

    async fn from_live(&self, request: &ResolveRequest<'_>) -> Option<String> {
        if !self.live_generation {
            return None;
        }
        let generator = self.generator.as_ref()?;

        let generation = GenerationRequest {
            text: request.chunk.base_content.clone(),
            transform_type: request.transform_type,
            level: match request.transform_type {
                TransformType::Rewrite => Some(request.level.unwrap_or(1)),
                TransformType::Expand => None,
            },
            idle_ms: match request.transform_type {
                TransformType::Rewrite => Some(request.idle_ms),
                TransformType::Expand => None,
            },
        };

        match generator.generate(&generation).await {
            Ok(response) if is_valid_content(&response.text, &self.policy) => {
                log_debug!("live generation for {} took {}ms", request.chunk.id, response.latency_ms);
                Some(response.text.trim().to_string())
            }
            Ok(_) => {
                log_warn!("live generation returned unusable text for {}", request.chunk.id);
                None
            }
            Err(err) => {
                log_warn!("live generation failed for {}: {err:#}", request.chunk.id);
                None
            }
        }
    }

    fn lock_rng(&self) -> MutexGuard<'_, StdRng> {
        match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{chunk_id, content_hash};
    use crate::dom::ElementHandle;
    use crate::remote::{FixedContentStore, FixedGenerationService, FixedPageSource, StoredVersion};
    use pretty_assertions::assert_eq;

    const ORIGINAL: &str = "The results have been published.";

    fn chunk(text: &str) -> ContentChunk {
        let hash = content_hash(text);
        ContentChunk::new(chunk_id("p", &hash), hash, ElementHandle(1), "p", text)
    }

    fn request<'a>(chunk: &'a ContentChunk, transform_type: TransformType, level: Option<u8>) -> ResolveRequest<'a> {
        ResolveRequest {
            chunk,
            route: "/news",
            transform_type,
            level,
            idle_ms: 6_000,
        }
    }

    #[tokio::test]
    async fn rewrite_prefers_content_map() {
        let pages = Arc::new(FixedPageSource::new().with_page("/news", 1, ORIGINAL, "Findings are now public."));
        let generator = Arc::new(FixedGenerationService::new(|_| Some("generated text here".into())));
        let resolver = ContentResolver::new(&OrchestratorConfig::default(), pages.clone(), Arc::new(FixedContentStore::new()))
            .with_generator(generator.clone());

        let chunk = chunk(ORIGINAL);
        let resolved = resolver.resolve(request(&chunk, TransformType::Rewrite, Some(1))).await.unwrap();
        assert_eq!(resolved.text, "Findings are now public.");
        assert_eq!(resolved.source, ContentSource::ContentMap);
        assert_eq!(generator.calls(), 0);

        // Second lookup is served from cache
        resolver.resolve(request(&chunk, TransformType::Rewrite, Some(1))).await;
        assert_eq!(pages.fetch_count(), 1);
    }

    #[tokio::test]
    async fn matching_uses_base_content_after_a_transform() {
        let pages = Arc::new(
            FixedPageSource::new()
                .with_page("/news", 1, ORIGINAL, "Findings are now public.")
                .with_page("/news", 2, ORIGINAL, "Public: the findings, finally."),
        );
        let resolver = ContentResolver::new(&OrchestratorConfig::default(), pages, Arc::new(FixedContentStore::new()));

        let mut chunk = chunk(ORIGINAL);
        chunk.current_content = "Findings are now public.".into();
        let resolved = resolver.resolve(request(&chunk, TransformType::Rewrite, Some(2))).await.unwrap();
        assert_eq!(resolved.text, "Public: the findings, finally.");
    }

    #[tokio::test]
    async fn store_versions_below_quality_are_ignored() {
        let store = Arc::new(FixedContentStore::new());
        let chunk = chunk("Fast readers get a longer version of this paragraph.");
        store.insert(
            &chunk.content_hash,
            TransformType::Expand,
            None,
            vec![
                StoredVersion { text: "A weak alternate nobody should see.".into(), score: 4.0 },
                StoredVersion { text: "A strong alternate with more detail for skimmers.".into(), score: 8.5 },
            ],
        );
        let resolver = ContentResolver::new(&OrchestratorConfig::default(), Arc::new(FixedPageSource::new()), store)
            .with_seed(7);

        for _ in 0..5 {
            let resolved = resolver.resolve(request(&chunk, TransformType::Expand, None)).await.unwrap();
            assert_eq!(resolved.source, ContentSource::Pregenerated);
            assert_eq!(resolved.text, "A strong alternate with more detail for skimmers.");
        }
    }

    #[tokio::test]
    async fn live_generation_is_the_last_resort() {
        let generator = Arc::new(FixedGenerationService::new(|req| {
            Some(format!("{} And then some more detail.", req.text))
        }));
        let resolver = ContentResolver::new(
            &OrchestratorConfig::default(),
            Arc::new(FixedPageSource::new()),
            Arc::new(FixedContentStore::new()),
        )
        .with_generator(generator.clone());

        let chunk = chunk("Nothing precomputed exists for this paragraph.");
        let resolved = resolver.resolve(request(&chunk, TransformType::Expand, None)).await.unwrap();
        assert_eq!(resolved.source, ContentSource::Live);
        assert!(resolved.text.ends_with("more detail."));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn failures_everywhere_resolve_to_none() {
        let config = OrchestratorConfig::default();
        let resolver = ContentResolver::new(&config, Arc::new(FixedPageSource::new()), Arc::new(FixedContentStore::new()))
            .with_generator(Arc::new(FixedGenerationService::failing()));
        let chunk = chunk(ORIGINAL);
        assert_eq!(resolver.resolve(request(&chunk, TransformType::Rewrite, Some(3))).await, None);

        let disabled = OrchestratorConfig {
            live_generation: false,
            ..OrchestratorConfig::default()
        };
        let generator = Arc::new(FixedGenerationService::new(|_| Some("would have worked fine".into())));
        let resolver = ContentResolver::new(&disabled, Arc::new(FixedPageSource::new()), Arc::new(FixedContentStore::new()))
            .with_generator(generator.clone());
        assert_eq!(resolver.resolve(request(&chunk, TransformType::Expand, None)).await, None);
        assert_eq!(generator.calls(), 0);
    }
}
