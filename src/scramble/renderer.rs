use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ScrambleConfig;
use crate::dom::{Document, ElementHandle};

use super::plan::ScrambleAnimation;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrambleOutcome {
    Completed,
    /// Cancelled, replaced by a newer scramble, or the element went away
    Cancelled,
}

/// Resolves once the scramble settles or is cancelled. Never left pending.
pub struct ScrambleCompletion {
    rx: oneshot::Receiver<ScrambleOutcome>,
    token: CancellationToken,
}

impl ScrambleCompletion {
    pub async fn wait(self) -> ScrambleOutcome {
        self.rx.await.unwrap_or(ScrambleOutcome::Cancelled)
    }

    /// Ask the scheduler to drop this animation on its next tick.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

struct Instance {
    animation: ScrambleAnimation,
    token: CancellationToken,
    done: Option<oneshot::Sender<ScrambleOutcome>>,
}

impl Instance {
    fn finish(mut self, outcome: ScrambleOutcome) {
        if let Some(done) = self.done.take() {
            // The waiter may have given up already
            let _ = done.send(outcome);
        }
    }
}

struct RendererState {
    active: HashMap<ElementHandle, Instance>,
    /// Markup each element had before its first scramble, for `reset`
    originals: HashMap<ElementHandle, String>,
    rng: StdRng,
}

struct Scheduler {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Character scramble transitions, one active animation per element, all
/// driven by one shared frame tick.
#[derive(Clone)]
pub struct ScrambleRenderer {
    document: Arc<dyn Document>,
    config: ScrambleConfig,
    state: Arc<Mutex<RendererState>>,
    scheduler: Arc<Mutex<Option<Scheduler>>>,
}

impl ScrambleRenderer {
    pub fn new(document: Arc<dyn Document>, config: ScrambleConfig) -> Self {
        Self {
            document,
            config,
            state: Arc::new(Mutex::new(RendererState {
                active: HashMap::new(),
                originals: HashMap::new(),
                rng: StdRng::from_entropy(),
            })),
            scheduler: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.lock_state().rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Start the shared frame tick. Without it, frames only advance through
    /// explicit [`ScrambleRenderer::advance`] calls.
    pub fn start(&self) {
        let frame = Duration::from_millis(self.config.frame_interval_ms.max(1));
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let renderer = self.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(frame);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => renderer.advance(),
                    _ = token.cancelled() => break,
                }
            }
        });

        if let Some(previous) = lock(&self.scheduler).replace(Scheduler {
            handle,
            cancel_token,
        }) {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }
        log_info!("scramble scheduler started ({}ms frames)", frame.as_millis());
    }

    /// Stop the frame tick, cancel every running animation and forget the
    /// saved originals.
    pub fn stop(&self) {
        if let Some(scheduler) = lock(&self.scheduler).take() {
            scheduler.cancel_token.cancel();
            scheduler.handle.abort();
        }
        let cancelled = self.cancel_all();
        self.lock_state().originals.clear();
        log_info!("scramble scheduler stopped ({} animations cancelled)", cancelled);
    }

    /// Begin a transition from the element's current text to `target`.
    /// An animation already running on the element is cancelled first.
    /// Returns `None` if the element is detached.
    pub fn scramble(&self, element: ElementHandle, target: &str) -> Option<ScrambleCompletion> {
        let current = self.document.text(element)?;
        let markup = self.document.markup(element).unwrap_or_else(|| current.clone());

        let (tx, rx) = oneshot::channel();
        let token = CancellationToken::new();

        let mut state = self.lock_state();
        state.originals.entry(element).or_insert(markup);
        let animation = ScrambleAnimation::new(&current, target, &self.config, &mut state.rng);
        let replaced = state.active.insert(
            element,
            Instance {
                animation,
                token: token.clone(),
                done: Some(tx),
            },
        );
        drop(state);

        if let Some(previous) = replaced {
            log_debug!("scramble on {:?} replaced a running one", element);
            previous.finish(ScrambleOutcome::Cancelled);
        }
        Some(ScrambleCompletion { rx, token })
    }

    /// Render one frame of every active animation.
    pub fn advance(&self) {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let mut finished = Vec::new();
        let mut detached = Vec::new();
        for (element, instance) in state.active.iter_mut() {
            if instance.token.is_cancelled() {
                finished.push((*element, ScrambleOutcome::Cancelled));
                continue;
            }
            let (frame, done) = instance.animation.next_frame(&mut state.rng);
            if !self.document.set_text(*element, &frame) {
                finished.push((*element, ScrambleOutcome::Cancelled));
                detached.push(*element);
            } else if done {
                finished.push((*element, ScrambleOutcome::Completed));
            }
        }
        for element in detached {
            state.originals.remove(&element);
        }

        let settled: Vec<(Instance, ScrambleOutcome)> = finished
            .into_iter()
            .filter_map(|(element, outcome)| state.active.remove(&element).map(|i| (i, outcome)))
            .collect();
        drop(guard);

        for (instance, outcome) in settled {
            instance.finish(outcome);
        }
    }

    /// Abort the element's animation, leaving its current text in place.
    pub fn cancel(&self, element: ElementHandle) -> bool {
        let removed = self.lock_state().active.remove(&element);
        match removed {
            Some(instance) => {
                instance.token.cancel();
                instance.finish(ScrambleOutcome::Cancelled);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Instance> = self.lock_state().active.drain().map(|(_, i)| i).collect();
        let count = drained.len();
        for instance in drained {
            instance.token.cancel();
            instance.finish(ScrambleOutcome::Cancelled);
        }
        count
    }

    /// Cancel any animation and put back the markup the element had before
    /// it was first scrambled.
    pub fn reset(&self, element: ElementHandle) -> bool {
        self.cancel(element);
        let original = self.lock_state().originals.remove(&element);
        match original {
            Some(markup) => self.document.set_markup(element, &markup),
            None => false,
        }
    }

    pub fn is_animating(&self, element: ElementHandle) -> bool {
        self.lock_state().active.contains_key(&element)
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().active.len()
    }

    /// Elements whose pre-scramble markup is still held for `reset`.
    pub fn saved_originals(&self) -> usize {
        self.lock_state().originals.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, RendererState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
