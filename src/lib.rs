pub mod behavior;
pub mod chunks;
pub mod clock;
pub mod config;
pub mod content;
pub mod db;
pub mod dom;
pub mod engine;
pub mod evaluation;
pub mod interaction;
pub mod remote;
pub mod scramble;
pub mod telemetry;
pub mod transform;
pub mod utils;

pub use behavior::{BehaviorService, BehaviorState, Mode};
pub use chunks::{ChunkRegistry, ContentChunk};
pub use config::{ConfigStore, EngineConfig};
pub use db::Database;
pub use engine::{Engine, EngineServices};
pub use evaluation::{EvaluationBatch, EvaluationReport, Evaluator};
pub use transform::{TransformOrchestrator, TransformationRecord};
pub use utils::logging::init_logging;
