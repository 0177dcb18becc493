use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Neutral,
    Expand,
    Rewrite,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Neutral
    }
}

impl Mode {
    pub fn is_active(&self) -> bool {
        !matches!(self, Mode::Neutral)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Neutral => "NEUTRAL",
            Mode::Expand => "EXPAND",
            Mode::Rewrite => "REWRITE",
        }
    }
}

pub const MIN_REWRITE_LEVEL: u8 = 1;
pub const MAX_REWRITE_LEVEL: u8 = 4;

/// Snapshot of the reader's inferred intent. Owned by the behavior engine;
/// everything else receives clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorState {
    pub mode: Mode,
    /// Only meaningful while `mode == Rewrite`
    pub rewrite_level: u8,
    /// Pixels per second over the rolling window
    pub scroll_velocity: f64,
    pub idle_time_ms: u64,
    pub fast_scroll_sustained: bool,
    pub session_duration_ms: u64,
    pub last_interaction_ms: u64,
    pub last_mode_change_ms: u64,
    pub page_visible: bool,
}

impl BehaviorState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            mode: Mode::Neutral,
            rewrite_level: MIN_REWRITE_LEVEL,
            scroll_velocity: 0.0,
            idle_time_ms: 0,
            fast_scroll_sustained: false,
            session_duration_ms: 0,
            last_interaction_ms: now_ms,
            last_mode_change_ms: now_ms,
            page_visible: true,
        }
    }

    /// Level to act on: the rewrite level in REWRITE, `None` otherwise.
    pub fn active_level(&self) -> Option<u8> {
        match self.mode {
            Mode::Rewrite => Some(self.rewrite_level),
            _ => None,
        }
    }
}

impl Default for BehaviorState {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Transition notifications fanned out to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BehaviorEvent {
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
}
