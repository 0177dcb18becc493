use std::collections::VecDeque;

const ENABLE_LOGS: bool = false;

use crate::log_debug;

/// Scroll positions over a rolling time window.
#[derive(Debug, Clone)]
pub struct VelocityWindow {
    window_ms: u64,
    samples: VecDeque<(u64, f64)>,
}

impl VelocityWindow {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            samples: VecDeque::new(),
        }
    }

    /// Record a scroll offset. A sample older than the newest one held means
    /// the clock went backwards; the window restarts from that sample.
    pub fn push(&mut self, timestamp_ms: u64, offset: f64) {
        if !offset.is_finite() {
            return;
        }
        if let Some(&(last_ts, _)) = self.samples.back() {
            if timestamp_ms < last_ts {
                log_debug!(
                    "scroll clock went backwards ({} < {}); restarting window",
                    timestamp_ms,
                    last_ts
                );
                self.samples.clear();
            }
        }
        self.samples.push_back((timestamp_ms, offset));
        self.prune(timestamp_ms);
    }

    pub fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(&(ts, _)) = self.samples.front() {
            if ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Pixels per second between the oldest and newest sample in the window.
    /// Zero with fewer than two samples.
    pub fn velocity(&self) -> f64 {
        let (Some(&(first_ts, first_y)), Some(&(last_ts, last_y))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        if self.samples.len() < 2 || last_ts <= first_ts {
            return 0.0;
        }
        let elapsed_secs = (last_ts - first_ts) as f64 / 1000.0;
        (last_y - first_y).abs() / elapsed_secs
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_samples_is_zero() {
        let mut window = VelocityWindow::new(500);
        assert_eq!(window.velocity(), 0.0);
        window.push(100, 40.0);
        assert_eq!(window.velocity(), 0.0);
    }

    #[test]
    fn velocity_in_pixels_per_second() {
        let mut window = VelocityWindow::new(500);
        window.push(0, 0.0);
        window.push(100, 60.0);
        window.push(200, 120.0);
        assert!((window.velocity() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn direction_does_not_matter() {
        let mut window = VelocityWindow::new(500);
        window.push(0, 500.0);
        window.push(250, 400.0);
        assert!((window.velocity() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn old_samples_fall_out_of_the_window() {
        let mut window = VelocityWindow::new(500);
        window.push(0, 0.0);
        window.push(100, 100.0);
        window.prune(700);
        assert!(window.is_empty());
        assert_eq!(window.velocity(), 0.0);
    }

    #[test]
    fn backward_clock_jump_restarts_the_window() {
        let mut window = VelocityWindow::new(500);
        window.push(10_000, 0.0);
        window.push(10_100, 10.0);
        window.push(200, 9000.0);
        assert_eq!(window.len(), 1);

        // Velocity is measured again right away, not once the clock catches up
        window.push(300, 9060.0);
        window.push(400, 9120.0);
        assert!((window.velocity() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn same_timestamp_does_not_divide_by_zero() {
        let mut window = VelocityWindow::new(500);
        window.push(300, 10.0);
        window.push(300, 20.0);
        assert_eq!(window.velocity(), 0.0);
    }
}
