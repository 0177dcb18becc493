//! Reader-intent state machine.
//!
//! Raw interaction samples become one of three modes: NEUTRAL, EXPAND (fast
//! sustained scrolling) and REWRITE (lingering, with an escalating level).

pub mod engine;
pub mod service;
pub mod state;
pub mod velocity;

pub use engine::BehaviorEngine;
pub use service::BehaviorService;
pub use state::{BehaviorEvent, BehaviorState, Mode, MAX_REWRITE_LEVEL, MIN_REWRITE_LEVEL};
pub use velocity::VelocityWindow;
