//! Raw interaction capture.
//!
//! The host forwards pointer, scroll, keyboard, touch and visibility events to
//! an [`InteractionSampler`], which stamps them with the session clock and
//! hands qualifying samples to the behavior engine.

pub mod sample;
pub mod sampler;

pub use sample::{InteractionSample, SampleKind, SamplePayload};
pub use sampler::{InteractionSampler, ListenerSpec};
