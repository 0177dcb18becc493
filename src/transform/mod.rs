//! Choosing, resolving and applying chunk transformations.

pub mod markers;
pub mod orchestrator;
pub mod record;

pub use markers::TransitionMarkers;
pub use orchestrator::{CycleReport, CycleSkip, CycleTrigger, TransformOrchestrator};
pub use record::{ContentSource, TransformType, TransformationRecord};
