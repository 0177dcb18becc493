use std::sync::Mutex;

use crate::behavior::Mode;
use crate::evaluation::{EvaluationBatch, InteractionSummary, VisitorMeta};
use crate::transform::TransformationRecord;

use super::{TelemetryEvent, TelemetrySink};

#[derive(Default)]
struct LogState {
    records: Vec<TransformationRecord>,
    summary: InteractionSummary,
}

/// Append-only record of what was changed this session, drained into
/// evaluation batches.
#[derive(Default)]
pub struct TransformationLog {
    inner: Mutex<LogState>,
}

impl TransformationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<TransformationRecord> {
        self.lock().records.clone()
    }

    /// Drain collected records into a batch. The interaction summary keeps
    /// accumulating across batches.
    pub fn take_batch(
        &self,
        session_id: &str,
        session_duration_ms: u64,
        visitor: VisitorMeta,
    ) -> EvaluationBatch {
        let mut state = self.lock();
        let records = std::mem::take(&mut state.records);
        let mut summary = state.summary.clone();
        summary.session_duration_ms = session_duration_ms;
        EvaluationBatch::new(session_id, records, summary, visitor)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TelemetrySink for TransformationLog {
    fn record(&self, event: TelemetryEvent) {
        let mut state = self.lock();
        match event {
            TelemetryEvent::ModeChanged { to, .. } => {
                state.summary.mode_changes += 1;
                match to {
                    Mode::Expand => state.summary.expand_episodes += 1,
                    Mode::Rewrite => state.summary.rewrite_episodes += 1,
                    Mode::Neutral => {}
                }
            }
            TelemetryEvent::LevelChanged { to, .. } => {
                state.summary.max_rewrite_level = state.summary.max_rewrite_level.max(to);
            }
            TelemetryEvent::TransformApplied { record } => {
                if let Some(level) = record.level {
                    state.summary.max_rewrite_level = state.summary.max_rewrite_level.max(level);
                }
                state.records.push(record);
            }
            TelemetryEvent::TransformSkipped { .. } => {}
        }
    }
}
