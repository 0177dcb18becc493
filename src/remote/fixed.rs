//! In-process service implementations for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::transform::TransformType;

use super::{
    ContentStore, GenerationRequest, GenerationResponse, GenerationService, PageContent,
    PageContentSource, ScoringRequest, ScoringService, StoredVersion,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type VersionKey = (String, TransformType, Option<u8>);

#[derive(Default)]
pub struct FixedContentStore {
    versions: Mutex<HashMap<VersionKey, Vec<StoredVersion>>>,
}

impl FixedContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        content_hash: &str,
        transform_type: TransformType,
        level: Option<u8>,
        versions: Vec<StoredVersion>,
    ) {
        lock(&self.versions).insert((content_hash.to_string(), transform_type, level), versions);
    }
}

#[async_trait]
impl ContentStore for FixedContentStore {
    async fn lookup(
        &self,
        content_hash: &str,
        transform_type: TransformType,
        level: Option<u8>,
    ) -> Result<Vec<StoredVersion>> {
        let key = (content_hash.to_string(), transform_type, level);
        Ok(lock(&self.versions).get(&key).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FixedPageSource {
    pages: Mutex<HashMap<(String, u8), PageContent>>,
    fetches: AtomicUsize,
}

impl FixedPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, route: &str, level: u8, original: &str, rewritten: &str) -> Self {
        lock(&self.pages).insert(
            (route.to_string(), level),
            PageContent {
                original: original.to_string(),
                rewritten: rewritten.to_string(),
            },
        );
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageContentSource for FixedPageSource {
    async fn fetch(&self, route: &str, level: u8) -> Result<Option<PageContent>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.pages).get(&(route.to_string(), level)).cloned())
    }
}

type Responder = Box<dyn Fn(&GenerationRequest) -> Option<String> + Send + Sync>;

/// Generation backed by a closure; `None` from the closure is a failure.
pub struct FixedGenerationService {
    responder: Responder,
    latency_ms: u64,
    calls: AtomicUsize,
}

impl FixedGenerationService {
    pub fn new(responder: impl Fn(&GenerationRequest) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            latency_ms: 0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::new(|_| None)
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for FixedGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = (self.responder)(request).ok_or_else(|| anyhow!("generation unavailable"))?;
        Ok(GenerationResponse {
            text,
            latency_ms: self.latency_ms,
        })
    }
}

/// Scoring that always answers with the same text.
pub struct FixedScoringService {
    response: Option<String>,
    requests: Mutex<Vec<ScoringRequest>>,
}

impl FixedScoringService {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ScoringRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ScoringService for FixedScoringService {
    async fn score(&self, request: &ScoringRequest) -> Result<String> {
        lock(&self.requests).push(request.clone());
        self.response
            .clone()
            .ok_or_else(|| anyhow!("scoring service unavailable"))
    }
}
