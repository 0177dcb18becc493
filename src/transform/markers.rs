use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::dom::{Document, ElementHandle};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

struct Sweeper {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Transitional attribute placed on elements while they animate.
///
/// Markers older than the timeout are force-cleared by [`TransitionMarkers::sweep`],
/// which also runs periodically once [`TransitionMarkers::start`] is called.
#[derive(Clone)]
pub struct TransitionMarkers {
    document: Arc<dyn Document>,
    clock: Arc<dyn Clock>,
    attribute: String,
    timeout_ms: u64,
    marked: Arc<Mutex<HashMap<ElementHandle, u64>>>,
    sweeper: Arc<Mutex<Option<Sweeper>>>,
}

impl TransitionMarkers {
    pub fn new(
        document: Arc<dyn Document>,
        clock: Arc<dyn Clock>,
        attribute: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            document,
            clock,
            attribute: attribute.into(),
            timeout_ms,
            marked: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    pub fn mark(&self, element: ElementHandle) -> bool {
        if !self.document.set_attribute(element, &self.attribute, "true") {
            return false;
        }
        lock(&self.marked).insert(element, self.clock.now_ms());
        true
    }

    pub fn clear(&self, element: ElementHandle) {
        lock(&self.marked).remove(&element);
        // Detached elements have nothing left to clean
        self.document.remove_attribute(element, &self.attribute);
    }

    pub fn is_marked(&self, element: ElementHandle) -> bool {
        lock(&self.marked).contains_key(&element)
    }

    pub fn len(&self) -> usize {
        lock(&self.marked).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force-clear markers left in place beyond the timeout.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let stuck: Vec<ElementHandle> = lock(&self.marked)
            .iter()
            .filter(|(_, marked_at)| now.saturating_sub(**marked_at) > self.timeout_ms)
            .map(|(element, _)| *element)
            .collect();

        for element in &stuck {
            self.clear(*element);
        }
        if !stuck.is_empty() {
            log_warn!("cleared {} stuck transition markers", stuck.len());
        }
        stuck.len()
    }

    pub fn clear_all(&self) -> usize {
        let elements: Vec<ElementHandle> = lock(&self.marked).keys().copied().collect();
        for element in &elements {
            self.clear(*element);
        }
        elements.len()
    }

    pub fn start(&self, interval_ms: u64) {
        let period = Duration::from_millis(interval_ms.max(1));
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let markers = self.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        markers.sweep();
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        if let Some(previous) = lock(&self.sweeper).replace(Sweeper {
            handle,
            cancel_token,
        }) {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }
        log_info!("marker sweep every {}ms", period.as_millis());
    }

    pub fn stop(&self) {
        if let Some(sweeper) = lock(&self.sweeper).take() {
            sweeper.cancel_token.cancel();
            sweeper.handle.abort();
        }
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
    use crate::clock::ManualClock;
    use crate::dom::{ElementSpec, MemoryDocument};

    fn setup() -> (Arc<MemoryDocument>, ManualClock, TransitionMarkers) {
        let doc = Arc::new(MemoryDocument::new("/"));
        let clock = ManualClock::new(0);
        let markers = TransitionMarkers::new(doc.clone(), Arc::new(clock.clone()), "data-transforming", 8_000);
        (doc, clock, markers)
    }

    #[test]
    fn mark_and_clear_toggle_the_attribute() {
        let (doc, _, markers) = setup();
        let el = doc.insert("main", ElementSpec::new("p", "text"));
        assert!(markers.mark(el));
        assert_eq!(doc.attribute(el, "data-transforming").as_deref(), Some("true"));
        markers.clear(el);
        assert_eq!(doc.attribute(el, "data-transforming"), None);
        assert!(markers.is_empty());
    }

    #[test]
    fn sweep_clears_only_stuck_markers() {
        let (doc, clock, markers) = setup();
        let old = doc.insert("main", ElementSpec::new("p", "old"));
        let fresh = doc.insert("main", ElementSpec::new("p", "fresh"));
        markers.mark(old);
        clock.set(5_000);
        markers.mark(fresh);

        clock.set(8_500);
        assert_eq!(markers.sweep(), 1);
        assert!(!markers.is_marked(old));
        assert!(markers.is_marked(fresh));
        assert_eq!(doc.attribute(old, "data-transforming"), None);
    }

    #[test]
    fn detached_elements_are_not_marked() {
        let (doc, _, markers) = setup();
        let el = doc.insert("main", ElementSpec::new("p", "gone"));
        doc.detach(el);
        assert!(!markers.mark(el));
        assert!(markers.is_empty());
    }
}
