//! Scramble-then-settle text transitions.

pub mod plan;
pub mod renderer;

pub use plan::{PositionTiming, ScrambleAnimation};
pub use renderer::{ScrambleCompletion, ScrambleOutcome, ScrambleRenderer};
