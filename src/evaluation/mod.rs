//! Sampled remote scoring of applied transformations.

pub mod batch;
pub mod evaluator;
pub mod parser;
pub mod prompt;
pub mod report;
pub mod sampling;

pub use batch::{EvaluationBatch, InteractionSummary, VisitorMeta};
pub use evaluator::Evaluator;
pub use parser::{parse_response, recover_json, ParsedScores};
pub use prompt::{build_request, truncate};
pub use report::{EvaluationReport, TransformationScore};
pub use sampling::{batch_seed, sample_batch, sample_for_scoring, SamplingKey};
