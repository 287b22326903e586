//! Sliding-window throughput accounting for diagnostics.
//!
//! The send and receive paths bump monotonically increasing byte
//! counters; a once-per-second tick turns the deltas into rates and
//! appends them to a bounded ring. Purely observational: nothing in
//! the adaptive layer reads these numbers.

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

/// Ring capacity: one minute of once-per-second samples.
pub const WINDOW_SLOTS: usize = 60;

/// One tick's worth of throughput, in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BitrateSample {
    pub sent_bps: u64,
    pub received_bps: u64,
}

/// Rolling-window bitrate meter.
pub struct BitrateMeter {
    total_sent: u64,
    total_received: u64,
    window: VecDeque<BitrateSample>,
    last_tick: Option<(Instant, u64, u64)>,
}

impl BitrateMeter {
    pub fn new() -> Self {
        Self {
            total_sent: 0,
            total_received: 0,
            window: VecDeque::with_capacity(WINDOW_SLOTS),
            last_tick: None,
        }
    }

    /// Record bytes put on the wire.
    pub fn add_sent(&mut self, bytes: u64) {
        self.total_sent += bytes;
    }

    /// Record bytes taken off the wire.
    pub fn add_received(&mut self, bytes: u64) {
        self.total_received += bytes;
    }

    /// Close the current accounting interval and append a sample.
    ///
    /// The first tick only establishes the baseline. When the ring is
    /// full the oldest sample is evicted, FIFO.
    pub fn tick(&mut self, now: Instant) {
        let Some((last_at, sent_then, received_then)) = self.last_tick else {
            self.last_tick = Some((now, self.total_sent, self.total_received));
            return;
        };

        let elapsed = now.saturating_duration_since(last_at).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }

        let sample = BitrateSample {
            sent_bps: ((self.total_sent - sent_then) as f64 / elapsed) as u64,
            received_bps: ((self.total_received - received_then) as f64 / elapsed) as u64,
        };
        if self.window.len() == WINDOW_SLOTS {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        self.last_tick = Some((now, self.total_sent, self.total_received));
    }

    /// Most recent per-tick rate.
    pub fn current(&self) -> BitrateSample {
        self.window.back().copied().unwrap_or_default()
    }

    /// Mean rate over the whole window.
    pub fn smoothed(&self) -> BitrateSample {
        if self.window.is_empty() {
            return BitrateSample::default();
        }
        let n = self.window.len() as u64;
        let (sent, received) = self
            .window
            .iter()
            .fold((0u64, 0u64), |(s, r), sample| {
                (s + sample.sent_bps, r + sample.received_bps)
            });
        BitrateSample {
            sent_bps: sent / n,
            received_bps: received / n,
        }
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }
}

impl Default for BitrateMeter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_tick_is_baseline_only() {
        let mut meter = BitrateMeter::new();
        meter.add_sent(1000);
        meter.tick(Instant::now());
        assert_eq!(meter.sample_count(), 0);
        assert_eq!(meter.current(), BitrateSample::default());
    }

    #[test]
    fn rates_from_deltas() {
        let mut meter = BitrateMeter::new();
        let t0 = Instant::now();
        meter.tick(t0);

        meter.add_sent(2000);
        meter.add_received(500);
        meter.tick(t0 + Duration::from_secs(1));

        let current = meter.current();
        assert_eq!(current.sent_bps, 2000);
        assert_eq!(current.received_bps, 500);

        // Next interval with no traffic goes back to zero.
        meter.tick(t0 + Duration::from_secs(2));
        assert_eq!(meter.current(), BitrateSample::default());
    }

    #[test]
    fn window_is_bounded() {
        let mut meter = BitrateMeter::new();
        let t0 = Instant::now();
        meter.tick(t0);
        for i in 1..=(WINDOW_SLOTS + 20) {
            meter.add_sent(100);
            meter.tick(t0 + Duration::from_secs(i as u64));
        }
        assert_eq!(meter.sample_count(), WINDOW_SLOTS);
    }

    #[test]
    fn smoothed_is_window_mean() {
        let mut meter = BitrateMeter::new();
        let t0 = Instant::now();
        meter.tick(t0);

        meter.add_sent(1000);
        meter.tick(t0 + Duration::from_secs(1));
        meter.add_sent(3000);
        meter.tick(t0 + Duration::from_secs(2));

        assert_eq!(meter.smoothed().sent_bps, 2000);
    }

    #[test]
    fn zero_elapsed_tick_is_ignored() {
        let mut meter = BitrateMeter::new();
        let t0 = Instant::now();
        meter.tick(t0);
        meter.add_sent(1000);
        meter.tick(t0);
        assert_eq!(meter.sample_count(), 0);
    }
}
