use crate::config::BehaviorConfig;
use crate::interaction::{InteractionSample, SampleKind};

use super::state::{BehaviorEvent, BehaviorState, Mode, MAX_REWRITE_LEVEL, MIN_REWRITE_LEVEL};
use super::velocity::VelocityWindow;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// The mode state machine.
///
/// Pure and synchronous: samples and ticks go in, [`BehaviorEvent`]s come out.
/// Interaction samples are applied before the tick that follows them, so a
/// scroll always zeroes the idle clock before REWRITE entry is evaluated.
#[derive(Debug, Clone)]
pub struct BehaviorEngine {
    config: BehaviorConfig,
    state: BehaviorState,
    velocity: VelocityWindow,
    session_start_ms: u64,
    /// When the velocity first exceeded the entry threshold in the current run
    fast_scroll_since: Option<u64>,
}

impl BehaviorEngine {
    pub fn new(config: BehaviorConfig, now_ms: u64) -> Self {
        let velocity = VelocityWindow::new(config.velocity_window_ms);
        Self {
            config,
            state: BehaviorState::new(now_ms),
            velocity,
            session_start_ms: now_ms,
            fast_scroll_since: None,
        }
    }

    pub fn state(&self) -> &BehaviorState {
        &self.state
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    /// Apply one interaction sample. Any qualifying interaction zeroes the
    /// idle clock and, in REWRITE, exits to NEUTRAL in the same update.
    pub fn process_sample(&mut self, sample: &InteractionSample) -> Vec<BehaviorEvent> {
        let mut events = Vec::new();

        if sample.kind == SampleKind::Visibility {
            if let Some(visible) = sample.payload.visible {
                self.state.page_visible = visible;
            }
            return events;
        }

        // A sample stamped before the last interaction still counts as
        // activity, but never moves the idle anchor backwards.
        self.state.last_interaction_ms = self.state.last_interaction_ms.max(sample.timestamp_ms);
        self.state.idle_time_ms = 0;

        if sample.kind == SampleKind::Scroll {
            if let Some(offset) = sample.payload.y {
                self.velocity.push(sample.timestamp_ms, offset);
            }
        }

        if self.state.mode == Mode::Rewrite {
            log_debug!(
                "{} interaction at {}ms interrupts REWRITE level {}",
                sample.kind.as_str(),
                sample.timestamp_ms,
                self.state.rewrite_level
            );
            events.push(self.transition(Mode::Neutral, sample.timestamp_ms, false));
        }

        events
    }

    /// Advance timers and evaluate transitions for one scheduling tick.
    pub fn tick(&mut self, now_ms: u64) -> Vec<BehaviorEvent> {
        let mut events = Vec::new();

        self.state.session_duration_ms = now_ms.saturating_sub(self.session_start_ms);
        self.state.idle_time_ms = now_ms.saturating_sub(self.state.last_interaction_ms);

        self.velocity.prune(now_ms);
        let velocity = self.velocity.velocity();
        self.state.scroll_velocity = velocity;
        self.update_fast_scroll(velocity, now_ms);

        match self.state.mode {
            Mode::Neutral => {
                if self.state.fast_scroll_sustained {
                    events.push(self.transition(Mode::Expand, now_ms, false));
                } else if self.state.idle_time_ms >= self.config.rewrite_idle_start_ms {
                    events.push(self.transition(Mode::Rewrite, now_ms, false));
                }
            }
            Mode::Expand => {
                let dwell = now_ms.saturating_sub(self.state.last_mode_change_ms);
                if !self.state.fast_scroll_sustained && dwell >= self.config.expand_min_dwell_ms {
                    events.push(self.transition(Mode::Neutral, now_ms, false));
                }
            }
            Mode::Rewrite => {
                let target = self.level_for_idle(self.state.idle_time_ms);
                if target > self.state.rewrite_level {
                    events.push(self.set_level(target, now_ms));
                }
            }
        }

        events
    }

    /// Put the engine into `mode` for diagnostics. Goes through the same
    /// transition path as organic changes so observers stay consistent.
    pub fn force_mode(&mut self, mode: Mode, level: Option<u8>, now_ms: u64) -> Vec<BehaviorEvent> {
        let mut events = Vec::new();
        if self.state.mode != mode {
            events.push(self.transition(mode, now_ms, true));
        }
        if mode == Mode::Rewrite {
            if let Some(level) = level {
                let level = level.clamp(MIN_REWRITE_LEVEL, MAX_REWRITE_LEVEL);
                if level != self.state.rewrite_level {
                    events.push(self.set_level(level, now_ms));
                }
            }
        }
        events
    }

    fn update_fast_scroll(&mut self, velocity: f64, now_ms: u64) {
        if self.state.fast_scroll_sustained {
            if velocity < self.config.expand_exit_velocity {
                self.state.fast_scroll_sustained = false;
                self.fast_scroll_since = None;
            }
            return;
        }

        if velocity > self.config.expand_entry_velocity {
            let since = *self.fast_scroll_since.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) >= self.config.expand_sustain_ms {
                self.state.fast_scroll_sustained = true;
            }
        } else {
            self.fast_scroll_since = None;
        }
    }

    fn level_for_idle(&self, idle_ms: u64) -> u8 {
        let mut level = MIN_REWRITE_LEVEL;
        for (index, threshold) in self.config.rewrite_level_thresholds_ms.iter().enumerate() {
            if idle_ms >= *threshold {
                level = (index as u8 + 1).min(MAX_REWRITE_LEVEL);
            }
        }
        level
    }

    fn transition(&mut self, to: Mode, now_ms: u64, forced: bool) -> BehaviorEvent {
        let from = self.state.mode;
        self.state.mode = to;
        self.state.last_mode_change_ms = now_ms;
        // Every entry into REWRITE starts a fresh episode at level 1.
        self.state.rewrite_level = MIN_REWRITE_LEVEL;

        log_info!(
            "mode {} -> {} at {}ms{}",
            from.as_str(),
            to.as_str(),
            now_ms,
            if forced { " (forced)" } else { "" }
        );

        BehaviorEvent::ModeChanged {
            from,
            to,
            level: self.state.rewrite_level,
            at_ms: now_ms,
            forced,
        }
    }

    fn set_level(&mut self, level: u8, now_ms: u64) -> BehaviorEvent {
        let from = self.state.rewrite_level;
        self.state.rewrite_level = level;
        log_info!("rewrite level {} -> {} at {}ms", from, level, now_ms);
        BehaviorEvent::LevelChanged {
            from,
            to: level,
            at_ms: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> BehaviorEngine {
        BehaviorEngine::new(BehaviorConfig::default(), 0)
    }

    /// Feed scroll samples every `step_ms` at `speed` px/s, ticking after each.
    fn scroll_run(
        engine: &mut BehaviorEngine,
        from_ms: u64,
        to_ms: u64,
        step_ms: u64,
        speed: f64,
        offset: &mut f64,
    ) -> Vec<BehaviorEvent> {
        let mut events = Vec::new();
        let mut t = from_ms;
        while t <= to_ms {
            *offset += speed * step_ms as f64 / 1000.0;
            events.extend(engine.process_sample(&InteractionSample::scroll(t, *offset)));
            events.extend(engine.tick(t));
            t += step_ms;
        }
        events
    }

    #[test]
    fn starts_neutral() {
        let engine = engine();
        assert_eq!(engine.state().mode, Mode::Neutral);
        assert_eq!(engine.state().rewrite_level, 1);
    }

    #[test]
    fn short_fast_burst_does_not_expand() {
        let mut engine = engine();
        let mut offset = 0.0;
        let events = scroll_run(&mut engine, 0, 600, 50, 900.0, &mut offset);
        assert!(events.is_empty());
        assert_eq!(engine.state().mode, Mode::Neutral);
    }

    #[test]
    fn sustained_fast_scroll_enters_expand_and_hysteresis_holds_it() {
        let mut engine = engine();
        let mut offset = 0.0;
        scroll_run(&mut engine, 0, 1_000, 50, 600.0, &mut offset);
        assert_eq!(engine.state().mode, Mode::Expand);
        assert!(engine.state().fast_scroll_sustained);

        // Between exit and entry thresholds: still sustained
        scroll_run(&mut engine, 1_050, 2_000, 50, 250.0, &mut offset);
        assert!(engine.state().fast_scroll_sustained);
        assert_eq!(engine.state().mode, Mode::Expand);
    }

    #[test]
    fn expand_exit_waits_for_min_dwell() {
        let mut engine = engine();
        let mut offset = 0.0;
        scroll_run(&mut engine, 0, 900, 50, 600.0, &mut offset);
        assert_eq!(engine.state().mode, Mode::Expand);
        let entered_at = engine.state().last_mode_change_ms;

        // Slow scrolling clears the sustained flag quickly...
        scroll_run(&mut engine, 1_000, 1_800, 100, 100.0, &mut offset);
        assert!(!engine.state().fast_scroll_sustained);
        assert_eq!(engine.state().mode, Mode::Expand);

        // ...but exit only happens once the dwell time has elapsed
        let events = scroll_run(&mut engine, 1_900, entered_at + 2_100, 100, 100.0, &mut offset);
        assert_eq!(engine.state().mode, Mode::Neutral);
        assert!(events
            .iter()
            .any(|e| matches!(e, BehaviorEvent::ModeChanged { from: Mode::Expand, to: Mode::Neutral, .. })));
    }

    #[test]
    fn idle_enters_rewrite_and_escalates() {
        let mut engine = engine();
        assert!(engine.tick(4_999).is_empty());

        let events = engine.tick(5_000);
        assert_eq!(
            events,
            vec![BehaviorEvent::ModeChanged {
                from: Mode::Neutral,
                to: Mode::Rewrite,
                level: 1,
                at_ms: 5_000,
                forced: false,
            }]
        );

        let mut last_level = 1;
        for t in (5_000..=70_000).step_by(500) {
            engine.tick(t);
            let level = engine.state().rewrite_level;
            assert!(level >= last_level);
            last_level = level;
        }
        assert_eq!(engine.state().rewrite_level, 4);
    }

    #[test]
    fn interaction_in_rewrite_exits_immediately() {
        let mut engine = engine();
        engine.tick(20_000);
        assert_eq!(engine.state().mode, Mode::Rewrite);

        let events = engine.process_sample(&InteractionSample::key(20_100));
        assert_eq!(engine.state().mode, Mode::Neutral);
        assert_eq!(engine.state().idle_time_ms, 0);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn visibility_change_does_not_count_as_interaction() {
        let mut engine = engine();
        engine.tick(6_000);
        assert_eq!(engine.state().mode, Mode::Rewrite);

        let events = engine.process_sample(&InteractionSample::visibility(6_100, false));
        assert!(events.is_empty());
        assert_eq!(engine.state().mode, Mode::Rewrite);
        assert!(!engine.state().page_visible);
    }

    #[test]
    fn reentering_rewrite_resets_level() {
        let mut engine = engine();
        engine.tick(5_000);
        engine.tick(31_000);
        assert_eq!(engine.state().rewrite_level, 3);

        engine.process_sample(&InteractionSample::click(31_100));
        engine.tick(36_100);
        assert_eq!(engine.state().mode, Mode::Rewrite);
        assert_eq!(engine.state().rewrite_level, 1);
    }

    #[test]
    fn clock_jumping_backwards_is_tolerated() {
        let mut engine = engine();
        engine.process_sample(&InteractionSample::click(10_000));
        let events = engine.tick(3_000);
        assert!(events.is_empty());
        assert_eq!(engine.state().idle_time_ms, 0);
        assert_eq!(engine.state().session_duration_ms, 3_000);
    }

    #[test]
    fn forced_mode_emits_through_transition_path() {
        let mut engine = engine();
        let events = engine.force_mode(Mode::Rewrite, Some(3), 100);
        assert_eq!(
            events,
            vec![
                BehaviorEvent::ModeChanged {
                    from: Mode::Neutral,
                    to: Mode::Rewrite,
                    level: 1,
                    at_ms: 100,
                    forced: true,
                },
                BehaviorEvent::LevelChanged {
                    from: 1,
                    to: 3,
                    at_ms: 100,
                },
            ]
        );
        assert_eq!(engine.state().active_level(), Some(3));

        assert!(engine.force_mode(Mode::Rewrite, None, 200).is_empty());
    }
}
