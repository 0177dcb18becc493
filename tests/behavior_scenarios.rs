use palimpsest_lib::behavior::{BehaviorEngine, BehaviorEvent, Mode};
use palimpsest_lib::config::BehaviorConfig;
use palimpsest_lib::interaction::InteractionSample;
use pretty_assertions::assert_eq;

/// Feed scroll samples at `speed` px/s every `step` ms over `[from, to]`,
/// ticking after each one.
fn scroll(
    engine: &mut BehaviorEngine,
    from: u64,
    to: u64,
    step: u64,
    speed: f64,
    offset: &mut f64,
) -> Vec<BehaviorEvent> {
    let mut events = Vec::new();
    let mut t = from;
    while t <= to {
        events.extend(engine.process_sample(&InteractionSample::scroll(t, *offset)));
        events.extend(engine.tick(t));
        *offset += speed * step as f64 / 1000.0;
        t += step;
    }
    events
}

#[test]
fn fast_scroll_expands_then_settles_back_to_neutral() {
    let config = BehaviorConfig::default();
    assert_eq!(config.expand_entry_velocity, 400.0);
    assert_eq!(config.expand_sustain_ms, 800);

    let mut engine = BehaviorEngine::new(config, 0);
    let mut offset = 0.0;

    let events = scroll(&mut engine, 0, 900, 16, 600.0, &mut offset);
    assert_eq!(engine.state().mode, Mode::Expand);
    let entered_at = events
        .iter()
        .find_map(|event| match event {
            BehaviorEvent::ModeChanged { to: Mode::Expand, at_ms, .. } => Some(*at_ms),
            _ => None,
        })
        .expect("expand entry");
    assert!((800..=900).contains(&entered_at), "entered at {entered_at}");

    // Slow scrolling keeps the reader engaged but below the exit velocity
    let events = scroll(&mut engine, 916, entered_at + 2_500, 16, 100.0, &mut offset);
    let exited_at = events
        .iter()
        .find_map(|event| match event {
            BehaviorEvent::ModeChanged { from: Mode::Expand, to: Mode::Neutral, at_ms, .. } => Some(*at_ms),
            _ => None,
        })
        .expect("expand exit");
    assert!(exited_at >= entered_at + 2_000);
    assert_eq!(engine.state().mode, Mode::Neutral);
}

#[test]
fn idle_reader_escalates_and_a_click_resets() {
    let mut engine = BehaviorEngine::new(BehaviorConfig::default(), 0);

    let mut t = 0;
    while t < 5_000 {
        engine.tick(t);
        t += 16;
    }
    assert_eq!(engine.state().mode, Mode::Neutral);

    engine.tick(5_000);
    assert_eq!(engine.state().mode, Mode::Rewrite);
    assert_eq!(engine.state().rewrite_level, 1);

    let mut last_level = 1;
    let mut t = 5_000;
    while t <= 16_000 {
        engine.tick(t);
        let level = engine.state().rewrite_level;
        assert!(level >= last_level);
        last_level = level;
        t += 100;
    }
    assert_eq!(engine.state().rewrite_level, 2);

    let events = engine.process_sample(&InteractionSample::click(16_500));
    assert_eq!(engine.state().mode, Mode::Neutral);
    assert!(matches!(
        events.as_slice(),
        [BehaviorEvent::ModeChanged { from: Mode::Rewrite, to: Mode::Neutral, at_ms: 16_500, .. }]
    ));
}

#[test]
fn modes_stay_mutually_exclusive_under_mixed_input() {
    let mut engine = BehaviorEngine::new(BehaviorConfig::default(), 0);
    let mut offset = 0.0;
    let mut t = 0;
    // Alternate bursts of fast scrolling, idling and clicks
    for round in 0..6u64 {
        scroll(&mut engine, t, t + 1_200, 20, 700.0, &mut offset);
        t += 1_200;
        let idle_until = t + 7_000 + round * 3_000;
        while t < idle_until {
            t += 50;
            engine.tick(t);
            let state = engine.state();
            if state.mode != Mode::Rewrite {
                assert_eq!(state.rewrite_level, 1);
            }
        }
        engine.process_sample(&InteractionSample::click(t));
        assert_ne!(engine.state().mode, Mode::Rewrite);
    }
}
