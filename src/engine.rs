//! Top-level wiring. A host builds one [`Engine`] per page session, calls
//! [`Engine::start`] once the document is ready and [`Engine::stop`] on
//! teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use uuid::Uuid;

use crate::behavior::BehaviorService;
use crate::chunks::{ChunkRegistry, SessionStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, ServicesConfig};
use crate::content::ContentResolver;
use crate::db::Database;
use crate::dom::Document;
use crate::evaluation::{EvaluationReport, Evaluator, VisitorMeta};
use crate::interaction::InteractionSampler;
use crate::remote::{
    ContentStore, FixedContentStore, FixedPageSource, FixedScoringService, GenerationService,
    HttpServiceClient, PageContentSource, ScoringService,
};
use crate::scramble::ScrambleRenderer;
use crate::telemetry::{DebugOverlay, DebugSnapshot, FanoutSink, LogSink, TelemetrySink, TransformationLog};
use crate::transform::{TransformOrchestrator, TransitionMarkers};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Remote collaborators the engine talks to.
#[derive(Clone)]
pub struct EngineServices {
    pub pages: Arc<dyn PageContentSource>,
    pub store: Arc<dyn ContentStore>,
    pub generator: Option<Arc<dyn GenerationService>>,
    pub scoring: Arc<dyn ScoringService>,
}

impl EngineServices {
    /// One HTTP client behind every service.
    pub fn http(config: &ServicesConfig) -> Result<Self> {
        let client = Arc::new(HttpServiceClient::new(config)?);
        Ok(Self {
            pages: client.clone(),
            store: client.clone(),
            generator: Some(client.clone()),
            scoring: client,
        })
    }

    /// No remote content at all: nothing resolves, scoring always fails
    /// closed.
    pub fn offline() -> Self {
        Self {
            pages: Arc::new(FixedPageSource::new()),
            store: Arc::new(FixedContentStore::new()),
            generator: None,
            scoring: Arc::new(FixedScoringService::failing()),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    session_id: String,
    clock: Arc<dyn Clock>,
    behavior: BehaviorService,
    sampler: Arc<InteractionSampler>,
    registry: ChunkRegistry,
    resolver: Arc<ContentResolver>,
    renderer: ScrambleRenderer,
    orchestrator: TransformOrchestrator,
    evaluator: Evaluator,
    overlay: Arc<DebugOverlay>,
    transformations: Arc<TransformationLog>,
    running: AtomicBool,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        document: Arc<dyn Document>,
        store: Arc<dyn SessionStore>,
        services: EngineServices,
    ) -> Result<Self> {
        Self::with_clock(config, document, store, services, Arc::new(SystemClock::new()))
    }

    /// Build every component. Fails on configuration that could never
    /// work, before anything touches the document.
    pub fn with_clock(
        config: EngineConfig,
        document: Arc<dyn Document>,
        store: Arc<dyn SessionStore>,
        services: EngineServices,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate(&config)?;

        let overlay = Arc::new(DebugOverlay::new());
        let transformations = Arc::new(TransformationLog::new());
        let mut fanout = FanoutSink::new()
            .with(overlay.clone())
            .with(transformations.clone());
        if config.debug {
            fanout = fanout.with(Arc::new(LogSink));
        }
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(fanout);

        let behavior =
            BehaviorService::new(config.behavior.clone(), clock.clone()).with_telemetry(telemetry.clone());
        let sampler = Arc::new(InteractionSampler::new(
            behavior.clone(),
            config.behavior.pointer_move_threshold_px,
        ));
        let registry = ChunkRegistry::new(config.registry.clone(), document.clone(), store)
            .with_behavior(behavior.clone());

        let mut resolver = ContentResolver::new(&config.orchestrator, services.pages, services.store);
        if let Some(generator) = services.generator {
            resolver = resolver.with_generator(generator);
        }
        let resolver = Arc::new(resolver);

        let renderer = ScrambleRenderer::new(document.clone(), config.scramble.clone());
        let markers = TransitionMarkers::new(
            document,
            clock.clone(),
            config.orchestrator.marker_attribute.clone(),
            config.orchestrator.marker_timeout_ms,
        );
        let orchestrator = TransformOrchestrator::new(
            config.orchestrator.clone(),
            behavior.clone(),
            registry.clone(),
            resolver.clone(),
            renderer.clone(),
            markers,
            telemetry,
        );
        let evaluator = Evaluator::new(config.evaluation.clone(), services.scoring);

        Ok(Self {
            config,
            session_id: Uuid::new_v4().to_string(),
            clock,
            behavior,
            sampler,
            registry,
            resolver,
            renderer,
            orchestrator,
            evaluator,
            overlay,
            transformations,
            running: AtomicBool::new(false),
        })
    }

    /// Persist evaluation reports and the transformations they cover.
    pub fn with_database(mut self, db: Database) -> Self {
        self.evaluator = self.evaluator.clone().with_database(db);
        self
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let chunks = self.registry.discover();
        self.behavior.start();
        self.sampler.start();
        self.renderer.start();
        self.orchestrator.start();
        log_info!(
            "engine started for {} (session {}, {} chunks)",
            self.registry.route(),
            self.session_id,
            chunks
        );
    }

    /// Tear everything down. Animations in flight are cancelled and no
    /// transition marker is left on the page.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.orchestrator.stop();
        self.renderer.stop();
        self.sampler.stop();
        self.behavior.stop();
        self.registry.stop();
        log_info!("engine stopped (session {})", self.session_id);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drain the transformations applied so far into a batch and score it.
    /// `None` when nothing was applied since the last call.
    pub async fn evaluate_pending(&self, visitor: VisitorMeta) -> Option<EvaluationReport> {
        if self.transformations.is_empty() {
            return None;
        }
        let batch = self
            .transformations
            .take_batch(&self.session_id, self.clock.now_ms(), visitor);
        Some(self.evaluator.evaluate(&batch).await)
    }

    /// Put every chunk back to its original text and forget stored
    /// transforms.
    pub fn reset(&self) -> usize {
        self.orchestrator.reset_session();
        self.resolver.clear_cache();
        self.registry.reset_all_content()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn behavior(&self) -> &BehaviorService {
        &self.behavior
    }

    pub fn sampler(&self) -> &InteractionSampler {
        &self.sampler
    }

    pub fn registry(&self) -> &ChunkRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &TransformOrchestrator {
        &self.orchestrator
    }

    pub fn renderer(&self) -> &ScrambleRenderer {
        &self.renderer
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        self.overlay.snapshot()
    }

    pub fn transformation_log(&self) -> &TransformationLog {
        &self.transformations
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_running() {
            log_warn!("engine dropped while running; stopping");
            self.stop();
        }
    }
}

fn validate(config: &EngineConfig) -> Result<()> {
    if config.registry.candidate_tags.is_empty() {
        bail!("registry has no candidate tags");
    }
    if config.registry.content_root.trim().is_empty() {
        bail!("registry content root is empty");
    }
    let behavior = &config.behavior;
    if behavior.expand_exit_velocity >= behavior.expand_entry_velocity {
        bail!(
            "expand exit velocity ({}) must be below entry velocity ({})",
            behavior.expand_exit_velocity,
            behavior.expand_entry_velocity
        );
    }
    if behavior.rewrite_level_thresholds_ms.windows(2).any(|pair| pair[0] > pair[1]) {
        bail!("rewrite level thresholds must be non-decreasing");
    }
    let scramble = &config.scramble;
    if scramble.min_duration_ticks > scramble.max_duration_ticks {
        bail!("scramble min duration exceeds max duration");
    }
    if scramble.filler_chars.is_empty() {
        bail!("scramble filler alphabet is empty");
    }
    if config.orchestrator.batch_size == 0 {
        bail!("orchestrator batch size must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::MemorySessionStore;
    use crate::clock::ManualClock;
    use crate::dom::{ElementSpec, MemoryDocument};

    fn document() -> Arc<MemoryDocument> {
        let doc = Arc::new(MemoryDocument::new("/essay"));
        doc.insert(
            "main",
            ElementSpec::new("p", "A paragraph with more than enough words to be a chunk."),
        );
        doc
    }

    #[test]
    fn invalid_configuration_is_rejected_before_mounting() {
        let mut config = EngineConfig::default();
        config.behavior.expand_exit_velocity = config.behavior.expand_entry_velocity;
        let result = Engine::new(
            config,
            document(),
            Arc::new(MemorySessionStore::new()),
            EngineServices::offline(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_discovers_and_stop_is_idempotent() {
        let doc = document();
        let engine = Engine::with_clock(
            EngineConfig::default(),
            doc.clone(),
            Arc::new(MemorySessionStore::new()),
            EngineServices::offline(),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        engine.start();
        assert!(engine.is_running());
        assert_eq!(engine.registry().len(), 1);
        assert!(engine.sampler().is_active());

        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
        assert!(!engine.sampler().is_active());
    }

    #[tokio::test]
    async fn nothing_to_evaluate_before_any_transform() {
        let engine = Engine::new(
            EngineConfig::default(),
            document(),
            Arc::new(MemorySessionStore::new()),
            EngineServices::offline(),
        )
        .unwrap();
        assert!(engine.evaluate_pending(VisitorMeta::default()).await.is_none());
    }
}
