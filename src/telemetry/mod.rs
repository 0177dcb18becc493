//! Observer-only reporting: mode changes, level changes and every applied
//! transformation. Sinks never feed back into the engine.

pub mod overlay;
pub mod transformation_log;

use std::sync::Arc;

use serde::Serialize;

use crate::behavior::{BehaviorEvent, Mode};
use crate::transform::TransformationRecord;

pub use overlay::{DebugOverlay, DebugSnapshot, TelemetryEntry};
pub use transformation_log::TransformationLog;

const ENABLE_LOGS: bool = true;

use crate::log_info;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TelemetryEvent {
    #[serde(rename_all = "camelCase")]
    ModeChanged {
        from: Mode,
        to: Mode,
        level: u8,
        at_ms: u64,
        forced: bool,
    },
    #[serde(rename_all = "camelCase")]
    LevelChanged { from: u8, to: u8, at_ms: u64 },
    #[serde(rename_all = "camelCase")]
    TransformApplied { record: TransformationRecord },
    #[serde(rename_all = "camelCase")]
    TransformSkipped { chunk_id: String, reason: String },
}

impl From<BehaviorEvent> for TelemetryEvent {
    fn from(event: BehaviorEvent) -> Self {
        match event {
            BehaviorEvent::ModeChanged {
                from,
                to,
                level,
                at_ms,
                forced,
            } => TelemetryEvent::ModeChanged {
                from,
                to,
                level,
                at_ms,
                forced,
            },
            BehaviorEvent::LevelChanged { from, to, at_ms } => {
                TelemetryEvent::LevelChanged { from, to, at_ms }
            }
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Writes every event to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::ModeChanged { from, to, level, at_ms, forced } => {
                log_info!(
                    "[telemetry] mode {} -> {} level={} at={}ms forced={}",
                    from.as_str(),
                    to.as_str(),
                    level,
                    at_ms,
                    forced
                );
            }
            TelemetryEvent::LevelChanged { from, to, at_ms } => {
                log_info!("[telemetry] level {} -> {} at={}ms", from, to, at_ms);
            }
            TelemetryEvent::TransformApplied { record } => {
                log_info!(
                    "[telemetry] {} {} level={:?} source={} latency={}ms",
                    record.transform_type.as_str(),
                    record.chunk_id,
                    record.level,
                    record.source.as_str(),
                    record.latency_ms
                );
            }
            TelemetryEvent::TransformSkipped { chunk_id, reason } => {
                log_info!("[telemetry] skipped {}: {}", chunk_id, reason);
            }
        }
    }
}

/// Forwards each event to several sinks.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutSink {
    fn record(&self, event: TelemetryEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}
