use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::behavior::{BehaviorEvent, BehaviorService, Mode};
use crate::chunks::{ChunkRegistry, ContentChunk};
use crate::config::OrchestratorConfig;
use crate::content::{ContentResolver, ResolveRequest};
use crate::scramble::{ScrambleOutcome, ScrambleRenderer};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

use super::markers::TransitionMarkers;
use super::record::{TransformType, TransformationRecord};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// What asked for a transformation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleTrigger {
    Poll,
    ModeEntered,
    LevelChanged,
    Manual,
}

impl CycleTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleTrigger::Poll => "poll",
            CycleTrigger::ModeEntered => "mode-entered",
            CycleTrigger::LevelChanged => "level-change",
            CycleTrigger::Manual => "manual",
        }
    }
}

/// Why a whole cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleSkip {
    /// Another cycle is still running
    Busy,
    Inactive,
    PageHidden,
    NoCandidates,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub applied: Vec<TransformationRecord>,
    pub skipped_chunks: usize,
    pub skip: Option<CycleSkip>,
    /// The mode changed before every selected chunk was processed
    pub interrupted: bool,
}

impl CycleReport {
    fn skipped(reason: CycleSkip) -> Self {
        Self {
            skip: Some(reason),
            ..Self::default()
        }
    }
}

struct Ticker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Per-chunk parameters fixed when the cycle picks the chunk.
#[derive(Debug, Clone, Copy)]
struct ChunkStep {
    transform_type: TransformType,
    mode: Mode,
    level: Option<u8>,
    idle_ms: u64,
    trigger: CycleTrigger,
}

/// Clears the in-flight flag however the cycle ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Picks chunks while the reader is in an active mode, resolves their
/// replacement text and drives the animated swap.
#[derive(Clone)]
pub struct TransformOrchestrator {
    config: OrchestratorConfig,
    behavior: BehaviorService,
    registry: ChunkRegistry,
    resolver: Arc<ContentResolver>,
    renderer: ScrambleRenderer,
    markers: TransitionMarkers,
    telemetry: Arc<dyn TelemetrySink>,
    transforming: Arc<AtomicBool>,
    last_cycle_ms: Arc<Mutex<Option<u64>>>,
    /// Chunks transformed since the set was last cleared
    transformed: Arc<Mutex<HashSet<String>>>,
    rng: Arc<Mutex<StdRng>>,
    ticker: Arc<Mutex<Option<Ticker>>>,
}

impl TransformOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        behavior: BehaviorService,
        registry: ChunkRegistry,
        resolver: Arc<ContentResolver>,
        renderer: ScrambleRenderer,
        markers: TransitionMarkers,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            behavior,
            registry,
            resolver,
            renderer,
            markers,
            telemetry,
            transforming: Arc::new(AtomicBool::new(false)),
            last_cycle_ms: Arc::new(Mutex::new(None)),
            transformed: Arc::new(Mutex::new(HashSet::new())),
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        *lock(&self.rng) = StdRng::seed_from_u64(seed);
        self
    }

    pub fn is_transforming(&self) -> bool {
        self.transforming.load(Ordering::SeqCst)
    }

    /// Forget which chunks were transformed and when the last cycle ran.
    pub fn reset_session(&self) {
        lock(&self.transformed).clear();
        *lock(&self.last_cycle_ms) = None;
    }

    /// Poll the behavior state and listen for transitions. A level change
    /// triggers an immediate pass; other triggers respect the minimum
    /// interval between cycles.
    pub fn start(&self) {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let orchestrator = self.clone();
        let mut events = self.behavior.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(poll);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => orchestrator.request_cycle(CycleTrigger::Poll, &token),
                    event = events.recv() => match event {
                        Ok(BehaviorEvent::LevelChanged { .. }) => {
                            orchestrator.request_cycle(CycleTrigger::LevelChanged, &token)
                        }
                        Ok(BehaviorEvent::ModeChanged { to, .. }) if to.is_active() => {
                            orchestrator.request_cycle(CycleTrigger::ModeEntered, &token)
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(missed)) => {
                            log_debug!("orchestrator missed {} behavior events", missed);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        if let Some(previous) = lock(&self.ticker).replace(Ticker {
            handle,
            cancel_token,
        }) {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }
        self.markers.start(self.config.sweep_interval_ms);
        log_info!(
            "transform orchestrator started (poll {}ms, batch {})",
            poll.as_millis(),
            self.config.batch_size
        );
    }

    /// Stop polling, end any running cycle after its current chunk and clear
    /// leftover markers.
    pub fn stop(&self) {
        if let Some(ticker) = lock(&self.ticker).take() {
            ticker.cancel_token.cancel();
            ticker.handle.abort();
            log_info!("transform orchestrator stopped");
        }
        self.markers.stop();
        self.markers.clear_all();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.ticker).is_some()
    }

    /// Spawn a cycle unless one is in flight or it is too soon.
    fn request_cycle(&self, trigger: CycleTrigger, token: &CancellationToken) {
        if self.is_transforming() || !self.behavior.get_state().mode.is_active() {
            return;
        }
        if trigger != CycleTrigger::LevelChanged && !self.interval_elapsed() {
            return;
        }

        let orchestrator = self.clone();
        let token = token.clone();
        tokio::spawn(async move {
            orchestrator.cycle(trigger, token).await;
        });
    }

    fn interval_elapsed(&self) -> bool {
        let now = self.behavior.clock().now_ms();
        match *lock(&self.last_cycle_ms) {
            Some(last) => now.saturating_sub(last) >= self.config.min_cycle_interval_ms,
            None => true,
        }
    }

    /// Run one pass now, ignoring the minimum interval. Still refuses to
    /// overlap a cycle already in flight.
    pub async fn run_cycle(&self, trigger: CycleTrigger) -> CycleReport {
        self.cycle(trigger, CancellationToken::new()).await
    }

    async fn cycle(&self, trigger: CycleTrigger, cancel: CancellationToken) -> CycleReport {
        if self.transforming.swap(true, Ordering::SeqCst) {
            return CycleReport::skipped(CycleSkip::Busy);
        }
        let _guard = CycleGuard(self.transforming.as_ref());

        let state = self.behavior.get_state();
        let transform_type = match state.mode {
            Mode::Neutral => return CycleReport::skipped(CycleSkip::Inactive),
            Mode::Expand => TransformType::Expand,
            Mode::Rewrite => TransformType::Rewrite,
        };
        if !state.page_visible {
            return CycleReport::skipped(CycleSkip::PageHidden);
        }

        let selection = self.select(self.registry.get_transformable_chunks());
        if selection.is_empty() {
            return CycleReport::skipped(CycleSkip::NoCandidates);
        }
        *lock(&self.last_cycle_ms) = Some(self.behavior.clock().now_ms());

        log_debug!(
            "{} cycle ({}): {} chunks",
            transform_type.as_str(),
            trigger.as_str(),
            selection.len()
        );

        let mut report = CycleReport::default();
        for (index, chunk) in selection.iter().enumerate() {
            if index > 0 && !self.stagger(&cancel).await {
                report.interrupted = true;
                break;
            }

            if self.interrupted(state.mode, &cancel) {
                report.interrupted = true;
                break;
            }

            let current = self.behavior.get_state();
            let step = ChunkStep {
                transform_type,
                mode: state.mode,
                level: current.active_level(),
                idle_ms: current.idle_time_ms,
                trigger,
            };
            match self.transform_chunk(chunk, step, &cancel).await {
                Some(record) => report.applied.push(record),
                None => {
                    report.skipped_chunks += 1;
                    if self.interrupted(state.mode, &cancel) {
                        report.interrupted = true;
                        break;
                    }
                }
            }
        }
        report
    }

    /// The reader left the cycle's mode or the orchestrator was stopped.
    fn interrupted(&self, mode: Mode, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.behavior.get_state().mode != mode
    }

    /// Least-transformed first. Once every candidate has been transformed
    /// the set is cleared so chunks can escalate.
    fn select(&self, candidates: Vec<ContentChunk>) -> Vec<ContentChunk> {
        if candidates.is_empty() {
            return candidates;
        }

        let mut transformed = lock(&self.transformed);
        let mut fresh: Vec<ContentChunk> = candidates
            .iter()
            .filter(|chunk| !transformed.contains(&chunk.id))
            .cloned()
            .collect();
        if fresh.is_empty() {
            log_debug!("all {} visible chunks transformed; starting over", candidates.len());
            transformed.clear();
            fresh = candidates;
        }

        fresh.sort_by_key(|chunk| chunk.transform_count);
        fresh.truncate(self.config.batch_size.max(1));
        fresh
    }

    /// Returns false if cancelled while waiting.
    async fn stagger(&self, cancel: &CancellationToken) -> bool {
        let delay = {
            let mut rng = lock(&self.rng);
            let min = self.config.stagger_min_ms;
            let max = self.config.stagger_max_ms.max(min);
            rng.gen_range(min..=max)
        };
        tokio::select! {
            _ = time::sleep(Duration::from_millis(delay)) => true,
            _ = cancel.cancelled() => false,
        }
    }

    async fn transform_chunk(
        &self,
        chunk: &ContentChunk,
        step: ChunkStep,
        cancel: &CancellationToken,
    ) -> Option<TransformationRecord> {
        let ChunkStep {
            transform_type,
            mode,
            level,
            idle_ms,
            trigger,
        } = step;
        let started = Instant::now();

        if !self.registry.is_attached(chunk) {
            self.skip(chunk, "detached");
            return None;
        }

        let route = self.registry.route();
        let resolution = self
            .resolver
            .resolve(ResolveRequest {
                chunk,
                route: &route,
                transform_type,
                level,
                idle_ms,
            })
            .await;
        let Some(resolution) = resolution else {
            self.skip(chunk, "no-content");
            return None;
        };
        // Nothing may touch the page once the reader is back or we are stopped
        if self.interrupted(mode, cancel) {
            self.skip(chunk, "interrupted");
            return None;
        }
        if resolution.text.trim() == chunk.current_content.trim() {
            self.skip(chunk, "unchanged");
            return None;
        }

        // The element may have gone while we were waiting on the network
        if !self.registry.is_attached(chunk) || !self.markers.mark(chunk.element) {
            self.skip(chunk, "detached");
            return None;
        }

        match self.renderer.scramble(chunk.element, &resolution.text) {
            Some(completion) => {
                let timeout = Duration::from_millis(self.config.animation_timeout_ms);
                match time::timeout(timeout, completion.wait()).await {
                    Ok(ScrambleOutcome::Completed) => {}
                    Ok(ScrambleOutcome::Cancelled) => {
                        log_debug!("scramble on {} cancelled", chunk.id);
                    }
                    Err(_) => {
                        log_warn!("scramble on {} timed out; settling directly", chunk.id);
                        self.renderer.cancel(chunk.element);
                    }
                }
            }
            None => {
                self.markers.clear(chunk.element);
                self.skip(chunk, "detached");
                return None;
            }
        }
        self.markers.clear(chunk.element);

        let updated = self.registry.update_chunk_content(
            &chunk.id,
            &resolution.text,
            transform_type,
            level,
        );
        if updated.is_none() {
            self.skip(chunk, "detached");
            return None;
        }

        let record = TransformationRecord {
            chunk_id: chunk.id.clone(),
            route,
            transform_type,
            level,
            trigger: trigger.as_str().to_string(),
            source: resolution.source,
            original_content: chunk.current_content.clone(),
            transformed_content: resolution.text,
            latency_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };
        lock(&self.transformed).insert(chunk.id.clone());
        self.telemetry.record(TelemetryEvent::TransformApplied {
            record: record.clone(),
        });
        Some(record)
    }

    fn skip(&self, chunk: &ContentChunk, reason: &str) {
        log_debug!("skipping chunk {}: {}", chunk.id, reason);
        self.telemetry.record(TelemetryEvent::TransformSkipped {
            chunk_id: chunk.id.clone(),
            reason: reason.to_string(),
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{MemorySessionStore, VisibilityEntry};
    use crate::clock::ManualClock;
    use crate::config::{BehaviorConfig, RegistryConfig, ScrambleConfig};
    use crate::dom::{Document, ElementHandle, ElementSpec, MemoryDocument};
    use crate::interaction::InteractionSample;
    use crate::remote::{FixedContentStore, FixedGenerationService, FixedPageSource, PageContent, PageContentSource};
    use crate::telemetry::{DebugOverlay, FanoutSink};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    const FIRST: &str = "The results have been published.";
    const SECOND: &str = "Careful readers will notice every small change here.";
    const THIRD: &str = "A third paragraph rounds out the visible page nicely.";

    struct Harness {
        clock: ManualClock,
        doc: Arc<MemoryDocument>,
        behavior: BehaviorService,
        registry: ChunkRegistry,
        renderer: ScrambleRenderer,
        overlay: Arc<DebugOverlay>,
        timeline: Arc<Timeline>,
        orchestrator: TransformOrchestrator,
        elements: Vec<ElementHandle>,
    }

    /// When each transform landed, in paused tokio time.
    #[derive(Default)]
    struct Timeline(Mutex<Vec<(String, Instant)>>);

    impl Timeline {
        fn applied(&self) -> Vec<(String, Instant)> {
            lock(&self.0).clone()
        }
    }

    impl TelemetrySink for Timeline {
        fn record(&self, event: TelemetryEvent) {
            if let TelemetryEvent::TransformApplied { record } = event {
                lock(&self.0).push((record.chunk_id, Instant::now()));
            }
        }
    }

    /// Page rewrites that take a while to arrive.
    struct SlowPages {
        inner: FixedPageSource,
        delay_ms: u64,
    }

    #[async_trait::async_trait]
    impl PageContentSource for SlowPages {
        async fn fetch(&self, route: &str, level: u8) -> anyhow::Result<Option<PageContent>> {
            time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.inner.fetch(route, level).await
        }
    }

    fn harness(pages: impl PageContentSource + 'static, generator: FixedGenerationService) -> Harness {
        let clock = ManualClock::new(0);
        let doc = Arc::new(MemoryDocument::new("/news"));
        let elements = [FIRST, SECOND, THIRD]
            .iter()
            .map(|text| doc.insert("main", ElementSpec::new("p", text)))
            .collect::<Vec<_>>();

        let behavior = BehaviorService::new(BehaviorConfig::default(), Arc::new(clock.clone()));
        let registry = ChunkRegistry::new(RegistryConfig::default(), doc.clone(), Arc::new(MemorySessionStore::new()));
        registry.discover();
        registry.apply_visibility(&elements.iter().map(|el| VisibilityEntry::visible(*el)).collect::<Vec<_>>());

        let config = OrchestratorConfig::default();
        let resolver = Arc::new(
            ContentResolver::new(&config, Arc::new(pages), Arc::new(FixedContentStore::new()))
                .with_generator(Arc::new(generator)),
        );
        let renderer = ScrambleRenderer::new(doc.clone(), ScrambleConfig::default()).with_seed(3);
        let markers = TransitionMarkers::new(doc.clone(), Arc::new(clock.clone()), "data-transforming", 8_000);
        let overlay = Arc::new(DebugOverlay::new());
        let timeline = Arc::new(Timeline::default());
        let telemetry = FanoutSink::new().with(overlay.clone()).with(timeline.clone());
        let orchestrator = TransformOrchestrator::new(
            config,
            behavior.clone(),
            registry.clone(),
            resolver,
            renderer.clone(),
            markers,
            Arc::new(telemetry),
        )
        .with_seed(1);

        Harness {
            clock,
            doc,
            behavior,
            registry,
            renderer,
            overlay,
            timeline,
            orchestrator,
            elements,
        }
    }

    fn expanding() -> FixedGenerationService {
        let calls = AtomicUsize::new(0);
        FixedGenerationService::new(move |req| {
            let take = calls.fetch_add(1, Ordering::SeqCst);
            Some(format!("{} Expanded with extra context, take {}.", req.text, take))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn neutral_mode_does_nothing() {
        let h = harness(FixedPageSource::new(), expanding());
        let report = h.orchestrator.run_cycle(CycleTrigger::Manual).await;
        assert_eq!(report.skip, Some(CycleSkip::Inactive));
        assert!(report.applied.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expand_cycle_transforms_a_batch_of_two() {
        let h = harness(FixedPageSource::new(), expanding());
        h.renderer.start();
        h.behavior.force_mode(Mode::Expand, None);

        let report = h.orchestrator.run_cycle(CycleTrigger::Manual).await;
        assert_eq!(report.applied.len(), 2);
        assert!(!report.interrupted);
        for record in &report.applied {
            assert_eq!(record.transform_type, TransformType::Expand);
            assert_eq!(record.level, None);
            let chunk = h.registry.get_chunk(&record.chunk_id).unwrap();
            assert_eq!(chunk.transform_count, 1);
            assert_eq!(h.doc.text(chunk.element).as_deref(), Some(record.transformed_content.as_str()));
            assert_eq!(h.doc.attribute(chunk.element, "data-transforming"), None);
        }
        assert_eq!(h.overlay.snapshot().transforms_applied, 2);

        // Next cycle prefers the chunk that has not been touched yet
        let report = h.orchestrator.run_cycle(CycleTrigger::Manual).await;
        assert_eq!(report.applied[0].chunk_id, h.registry.chunks()[2].id);
        h.renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn rewrite_uses_level_and_content_map() {
        let pages = FixedPageSource::new().with_page("/news", 1, FIRST, "Findings are now public.");
        let h = harness(pages, FixedGenerationService::failing());
        h.renderer.start();
        h.clock.set(5_000);
        h.behavior.tick();
        assert_eq!(h.behavior.get_state().mode, Mode::Rewrite);

        let report = h.orchestrator.run_cycle(CycleTrigger::Poll).await;
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.skipped_chunks, 1);
        let record = &report.applied[0];
        assert_eq!(record.level, Some(1));
        assert_eq!(record.transformed_content, "Findings are now public.");
        assert_eq!(h.doc.text(h.elements[0]).as_deref(), Some("Findings are now public."));
        assert_eq!(h.overlay.snapshot().transforms_skipped, 1);
        h.renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_page_skips_the_cycle() {
        let h = harness(FixedPageSource::new(), expanding());
        h.behavior.force_mode(Mode::Expand, None);
        h.behavior.record(&crate::interaction::InteractionSample::visibility(0, false));
        let report = h.orchestrator.run_cycle(CycleTrigger::Manual).await;
        assert_eq!(report.skip, Some(CycleSkip::PageHidden));
    }

    #[tokio::test(start_paused = true)]
    async fn detached_chunks_are_skipped() {
        let h = harness(FixedPageSource::new(), expanding());
        h.renderer.start();
        h.behavior.force_mode(Mode::Expand, None);
        h.doc.detach(h.elements[0]);

        let report = h.orchestrator.run_cycle(CycleTrigger::Manual).await;
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.skipped_chunks, 1);
        assert_eq!(h.registry.get_chunk(&h.registry.chunks()[0].id).unwrap().transform_count, 0);
        h.renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_cycles_are_skipped() {
        let h = harness(FixedPageSource::new(), expanding());
        h.renderer.start();
        h.behavior.force_mode(Mode::Expand, None);

        let first = h.orchestrator.run_cycle(CycleTrigger::Manual);
        let second = h.orchestrator.run_cycle(CycleTrigger::Manual);
        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.applied.len(), 2);
        assert_eq!(b.skip, Some(CycleSkip::Busy));
        assert!(!h.orchestrator.is_transforming());
        h.renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn all_transformed_clears_the_set() {
        let h = harness(FixedPageSource::new(), expanding());
        h.renderer.start();
        h.behavior.force_mode(Mode::Expand, None);

        h.orchestrator.run_cycle(CycleTrigger::Manual).await;
        h.orchestrator.run_cycle(CycleTrigger::Manual).await;
        let third = h.orchestrator.run_cycle(CycleTrigger::Manual).await;
        assert_eq!(third.applied.len(), 2);
        let counts: Vec<u32> = h.registry.chunks().iter().map(|c| c.transform_count).collect();
        assert_eq!(counts.iter().sum::<u32>(), 5);
        h.renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn started_orchestrator_reacts_to_mode_entry() {
        let h = harness(FixedPageSource::new(), expanding());
        h.renderer.start();
        h.orchestrator.start();
        h.behavior.force_mode(Mode::Expand, None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let transformed = h.registry.chunks().iter().filter(|c| c.transform_count > 0).count();
        assert_eq!(transformed, 2);

        h.orchestrator.stop();
        h.renderer.stop();
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn reader_returning_mid_resolve_leaves_the_page_alone() {
        let pages = SlowPages {
            inner: FixedPageSource::new().with_page("/news", 1, FIRST, "Findings are now public."),
            delay_ms: 1_000,
        };
        let h = harness(pages, FixedGenerationService::failing());
        h.renderer.start();
        h.clock.set(5_000);
        h.behavior.tick();
        assert_eq!(h.behavior.get_state().mode, Mode::Rewrite);

        let orchestrator = h.orchestrator.clone();
        let cycle = tokio::spawn(async move { orchestrator.run_cycle(CycleTrigger::Poll).await });

        time::sleep(Duration::from_millis(200)).await;
        h.clock.set(5_200);
        h.behavior.record(&InteractionSample::click(5_200));
        assert_eq!(h.behavior.get_state().mode, Mode::Neutral);

        let report = cycle.await.unwrap();
        assert!(report.applied.is_empty());
        assert!(report.interrupted);
        assert_eq!(h.doc.text(h.elements[0]).as_deref(), Some(FIRST));
        assert_eq!(h.doc.attribute(h.elements[0], "data-transforming"), None);
        assert_eq!(h.registry.chunks()[0].transform_count, 0);
        assert_eq!(h.overlay.snapshot().transforms_applied, 0);
        h.renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_resolve_leaves_the_page_alone() {
        let pages = SlowPages {
            inner: FixedPageSource::new().with_page("/news", 1, FIRST, "Findings are now public."),
            delay_ms: 1_000,
        };
        let h = harness(pages, FixedGenerationService::failing());
        h.renderer.start();
        h.clock.set(5_000);
        h.behavior.tick();
        h.orchestrator.start();

        time::sleep(Duration::from_millis(200)).await;
        assert!(h.orchestrator.is_transforming());
        h.orchestrator.stop();

        time::sleep(Duration::from_secs(10)).await;
        assert!(!h.orchestrator.is_transforming());
        assert_eq!(h.behavior.get_state().mode, Mode::Rewrite);
        assert_eq!(h.doc.text(h.elements[0]).as_deref(), Some(FIRST));
        assert_eq!(h.registry.chunks()[0].transform_count, 0);
        h.renderer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn polls_wait_out_the_interval_but_level_changes_do_not() {
        let h = harness(FixedPageSource::new(), expanding());
        let config = OrchestratorConfig::default();
        h.renderer.start();
        h.orchestrator.start();
        h.behavior.force_mode(Mode::Rewrite, Some(1));

        time::sleep(Duration::from_secs(10)).await;
        let first = h.timeline.applied();
        assert_eq!(first.len(), 2);
        let gap = first[1].1.duration_since(first[0].1);
        assert!(gap >= Duration::from_millis(config.stagger_min_ms), "gap {gap:?}");

        // Polls kept firing for ten seconds, but the session clock is still
        // inside the minimum interval
        let touched = h.registry.chunks().iter().filter(|c| c.transform_count > 0).count();
        assert_eq!(touched, 2);

        h.clock.set(1_000);
        h.behavior.force_mode(Mode::Rewrite, Some(2));
        time::sleep(Duration::from_secs(10)).await;
        let second = h.timeline.applied();
        assert_eq!(second.len(), 3);
        assert_eq!(second[2].0, h.registry.chunks()[2].id);
        assert_eq!(h.registry.chunks()[2].last_rewrite_level, Some(2));

        h.orchestrator.stop();
        h.renderer.stop();
    }
}
