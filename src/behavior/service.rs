use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::BehaviorConfig;
use crate::interaction::InteractionSample;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

use super::engine::BehaviorEngine;
use super::state::{BehaviorEvent, BehaviorState, Mode};

const ENABLE_LOGS: bool = true;

use crate::log_info;

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct Ticker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Shared handle to the behavior engine.
///
/// The engine is the single writer of [`BehaviorState`]; consumers read
/// snapshots through [`BehaviorService::get_state`] or a watch receiver and
/// observe transitions through [`BehaviorService::subscribe`].
#[derive(Clone)]
pub struct BehaviorService {
    engine: Arc<Mutex<BehaviorEngine>>,
    clock: Arc<dyn Clock>,
    state_tx: Arc<watch::Sender<BehaviorState>>,
    events_tx: broadcast::Sender<BehaviorEvent>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    ticker: Arc<Mutex<Option<Ticker>>>,
}

impl BehaviorService {
    pub fn new(config: BehaviorConfig, clock: Arc<dyn Clock>) -> Self {
        let engine = BehaviorEngine::new(config, clock.now_ms());
        let (state_tx, _) = watch::channel(engine.state().clone());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            engine: Arc::new(Mutex::new(engine)),
            clock,
            state_tx: Arc::new(state_tx),
            events_tx,
            telemetry: None,
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    /// Report every mode and level change to `sink`.
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn get_state(&self) -> BehaviorState {
        self.lock_engine().state().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<BehaviorState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BehaviorEvent> {
        self.events_tx.subscribe()
    }

    /// Apply an interaction sample immediately. REWRITE exits here, not on
    /// the next tick.
    pub fn record(&self, sample: &InteractionSample) {
        let (events, snapshot) = {
            let mut engine = self.lock_engine();
            let events = engine.process_sample(sample);
            (events, engine.state().clone())
        };
        self.publish(events, snapshot);
    }

    pub fn tick(&self) {
        self.tick_at(self.clock.now_ms());
    }

    pub fn tick_at(&self, now_ms: u64) {
        let (events, snapshot) = {
            let mut engine = self.lock_engine();
            let events = engine.tick(now_ms);
            (events, engine.state().clone())
        };
        self.publish(events, snapshot);
    }

    /// Diagnostic override of the current mode.
    pub fn force_mode(&self, mode: Mode, level: Option<u8>) {
        let now_ms = self.clock.now_ms();
        let (events, snapshot) = {
            let mut engine = self.lock_engine();
            let events = engine.force_mode(mode, level, now_ms);
            (events, engine.state().clone())
        };
        self.publish(events, snapshot);
    }

    /// Spawn the per-frame ticker. Restarting replaces the previous ticker.
    pub fn start(&self) {
        let tick_interval = {
            let engine = self.lock_engine();
            Duration::from_millis(engine.config().tick_interval_ms.max(1))
        };

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let service = self.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => service.tick(),
                    _ = token.cancelled() => break,
                }
            }
        });

        let mut guard = lock(&self.ticker);
        if let Some(previous) = guard.replace(Ticker {
            handle,
            cancel_token,
        }) {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }
        log_info!("behavior ticker started ({}ms)", tick_interval.as_millis());
    }

    pub fn stop(&self) {
        if let Some(ticker) = lock(&self.ticker).take() {
            ticker.cancel_token.cancel();
            ticker.handle.abort();
            log_info!("behavior ticker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.ticker).is_some()
    }

    fn publish(&self, events: Vec<BehaviorEvent>, snapshot: BehaviorState) {
        self.state_tx.send_replace(snapshot);
        for event in events {
            if let Some(sink) = &self.telemetry {
                sink.record(TelemetryEvent::from(event.clone()));
            }
            // No receivers is fine
            let _ = self.events_tx.send(event);
        }
    }

    fn lock_engine(&self) -> MutexGuard<'_, BehaviorEngine> {
        lock(&self.engine)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::telemetry::DebugOverlay;

    fn service(clock: &ManualClock) -> BehaviorService {
        BehaviorService::new(BehaviorConfig::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn watch_receiver_sees_latest_state() {
        let clock = ManualClock::new(0);
        let service = service(&clock);
        let rx = service.watch_state();

        clock.set(5_000);
        service.tick();
        assert_eq!(rx.borrow().mode, Mode::Rewrite);
    }

    #[test]
    fn subscribers_receive_transitions_in_order() {
        let clock = ManualClock::new(0);
        let service = service(&clock);
        let mut rx = service.subscribe();

        service.tick_at(5_000);
        service.tick_at(16_000);
        service.record(&InteractionSample::click(16_500));

        assert!(matches!(rx.try_recv().unwrap(), BehaviorEvent::ModeChanged { to: Mode::Rewrite, .. }));
        assert!(matches!(rx.try_recv().unwrap(), BehaviorEvent::LevelChanged { from: 1, to: 2, .. }));
        assert!(matches!(rx.try_recv().unwrap(), BehaviorEvent::ModeChanged { to: Mode::Neutral, .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forced_mode_reaches_telemetry() {
        let clock = ManualClock::new(0);
        let overlay = Arc::new(DebugOverlay::new());
        let service = service(&clock).with_telemetry(overlay.clone());

        service.force_mode(Mode::Expand, None);
        let snapshot = overlay.snapshot();
        assert_eq!(snapshot.mode_changes, 1);
        assert_eq!(service.get_state().mode, Mode::Expand);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_drives_idle_transition() {
        let clock = ManualClock::new(0);
        let service = service(&clock);
        service.start();
        assert!(service.is_running());

        clock.set(6_000);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.get_state().mode, Mode::Rewrite);

        service.stop();
        assert!(!service.is_running());
    }
}
