use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::behavior::BehaviorService;

use super::sample::{InteractionSample, SampleKind};

const ENABLE_LOGS: bool = true;

use crate::log_info;

/// A DOM event the host must subscribe to on the sampler's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    pub event: &'static str,
    pub kind: SampleKind,
    /// Register without the ability to cancel the native action
    pub passive: bool,
}

const LISTENERS: &[ListenerSpec] = &[
    ListenerSpec { event: "scroll", kind: SampleKind::Scroll, passive: true },
    ListenerSpec { event: "pointermove", kind: SampleKind::Pointer, passive: true },
    ListenerSpec { event: "touchstart", kind: SampleKind::Touch, passive: true },
    ListenerSpec { event: "touchmove", kind: SampleKind::Touch, passive: true },
    ListenerSpec { event: "click", kind: SampleKind::Click, passive: false },
    ListenerSpec { event: "keydown", kind: SampleKind::Key, passive: false },
    ListenerSpec { event: "visibilitychange", kind: SampleKind::Visibility, passive: false },
];

/// Normalizes host events into timestamped samples for the behavior engine.
pub struct InteractionSampler {
    behavior: BehaviorService,
    pointer_threshold_px: f64,
    last_pointer: Mutex<Option<(f64, f64)>>,
    active: AtomicBool,
}

impl InteractionSampler {
    pub fn new(behavior: BehaviorService, pointer_threshold_px: f64) -> Self {
        Self {
            behavior,
            pointer_threshold_px,
            last_pointer: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    pub fn listeners() -> &'static [ListenerSpec] {
        LISTENERS
    }

    pub fn start(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            log_info!("interaction sampler attached ({} listeners)", LISTENERS.len());
        }
    }

    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            *self.lock_pointer() = None;
            log_info!("interaction sampler detached");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn on_scroll(&self, offset_y: f64) -> bool {
        self.submit(InteractionSample::scroll(self.now(), offset_y))
    }

    pub fn on_pointer_move(&self, x: f64, y: f64) -> bool {
        self.submit(InteractionSample::pointer(self.now(), x, y))
    }

    pub fn on_click(&self) -> bool {
        self.submit(InteractionSample::click(self.now()))
    }

    pub fn on_key(&self) -> bool {
        self.submit(InteractionSample::key(self.now()))
    }

    pub fn on_touch(&self) -> bool {
        self.submit(InteractionSample::touch(self.now()))
    }

    pub fn on_visibility(&self, visible: bool) -> bool {
        self.submit(InteractionSample::visibility(self.now(), visible))
    }

    /// Forward a sample to the engine. Returns whether it was accepted:
    /// nothing is accepted while stopped, and pointer jitter below the
    /// threshold is dropped.
    pub fn submit(&self, sample: InteractionSample) -> bool {
        if !self.is_active() {
            return false;
        }
        if sample.kind == SampleKind::Pointer && !self.pointer_moved_enough(&sample) {
            return false;
        }
        self.behavior.record(&sample);
        true
    }

    fn pointer_moved_enough(&self, sample: &InteractionSample) -> bool {
        let (Some(x), Some(y)) = (sample.payload.x, sample.payload.y) else {
            return false;
        };
        let mut last = self.lock_pointer();
        match *last {
            Some((last_x, last_y)) => {
                let distance = ((x - last_x).powi(2) + (y - last_y).powi(2)).sqrt();
                if distance >= self.pointer_threshold_px {
                    *last = Some((x, y));
                    true
                } else {
                    false
                }
            }
            None => {
                *last = Some((x, y));
                false
            }
        }
    }

    fn now(&self) -> u64 {
        self.behavior.clock().now_ms()
    }

    fn lock_pointer(&self) -> std::sync::MutexGuard<'_, Option<(f64, f64)>> {
        match self.last_pointer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
