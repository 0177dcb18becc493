use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{TelemetryEvent, TelemetrySink};

const MAX_RECENT_EVENTS: usize = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEntry {
    pub received_at: DateTime<Utc>,
    pub event: TelemetryEvent,
}

/// Data behind the live diagnostic overlay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub recent_events: Vec<TelemetryEntry>,
    pub mode_changes: u64,
    pub level_changes: u64,
    pub transforms_applied: u64,
    pub transforms_skipped: u64,
    pub average_latency_ms: Option<f64>,
}

#[derive(Default)]
struct OverlayState {
    recent_events: VecDeque<TelemetryEntry>,
    mode_changes: u64,
    level_changes: u64,
    transforms_applied: u64,
    transforms_skipped: u64,
    total_latency_ms: u64,
}

#[derive(Default)]
pub struct DebugOverlay {
    inner: Mutex<OverlayState>,
}

impl DebugOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DebugSnapshot {
        let state = self.lock();
        let average_latency_ms = if state.transforms_applied > 0 {
            Some(state.total_latency_ms as f64 / state.transforms_applied as f64)
        } else {
            None
        };

        DebugSnapshot {
            recent_events: state.recent_events.iter().cloned().collect(),
            mode_changes: state.mode_changes,
            level_changes: state.level_changes,
            transforms_applied: state.transforms_applied,
            transforms_skipped: state.transforms_skipped,
            average_latency_ms,
        }
    }

    pub fn reset(&self) {
        *self.lock() = OverlayState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OverlayState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TelemetrySink for DebugOverlay {
    fn record(&self, event: TelemetryEvent) {
        let mut state = self.lock();

        match &event {
            TelemetryEvent::ModeChanged { .. } => state.mode_changes += 1,
            TelemetryEvent::LevelChanged { .. } => state.level_changes += 1,
            TelemetryEvent::TransformApplied { record } => {
                state.transforms_applied += 1;
                state.total_latency_ms += record.latency_ms;
            }
            TelemetryEvent::TransformSkipped { .. } => state.transforms_skipped += 1,
        }

        state.recent_events.push_back(TelemetryEntry {
            received_at: Utc::now(),
            event,
        });
        if state.recent_events.len() > MAX_RECENT_EVENTS {
            state.recent_events.pop_front();
        }
    }
}
