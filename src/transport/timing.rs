//! RTT and reorder-window estimation.
//!
//! Both estimators are driven by the inbound engine: the RTT estimator is fed
//! echoed probe timestamps, the window estimator counts in-window arrivals
//! and turns them into a buffer size once per round trip.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::core::constants::{INITIAL_RTT_MS, MAX_RTT_MS};

/// Timing constants.
pub mod constants {
    /// Samples averaged by both estimators.
    pub const SAMPLE_COUNT: usize = 10;

    /// Reorder window before ten samples exist.
    pub const INITIAL_WINDOW: usize = 30;

    /// Arrivals per round trip are scaled by this factor.
    pub const WINDOW_SCALE: f64 = 1.5;
}

/// Milliseconds since a process-local epoch, as carried in probe timestamps.
pub fn monotonic_ms(now: Instant) -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    now.saturating_duration_since(epoch).as_millis() as i64
}

/// Round-trip estimator: the mean of the last ten echoed probes.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    samples: VecDeque<u32>,
    rtt_ms: u32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    /// Create an estimator at the initial 100 ms.
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(constants::SAMPLE_COUNT),
            rtt_ms: INITIAL_RTT_MS,
        }
    }

    /// Feed one round-trip sample.
    ///
    /// Samples deviating from the current estimate by more than the RTT
    /// ceiling are discarded. Returns the new estimate when accepted.
    pub fn update(&mut self, sample_ms: i64) -> Option<u32> {
        if sample_ms < 0 || sample_ms.abs_diff(self.rtt_ms as i64) > MAX_RTT_MS as u64 {
            return None;
        }
        self.samples.push_back(sample_ms as u32);
        let sum: u64 = self.samples.iter().map(|&s| s as u64).sum();
        self.rtt_ms = (sum / self.samples.len() as u64) as u32;
        if self.samples.len() >= constants::SAMPLE_COUNT {
            self.samples.pop_front();
        }
        Some(self.rtt_ms)
    }

    /// Current estimate in milliseconds.
    pub fn rtt_ms(&self) -> u32 {
        self.rtt_ms
    }

    /// Current estimate.
    pub fn rtt(&self) -> Duration {
        Duration::from_millis(self.rtt_ms as u64)
    }
}

/// Reorder-window estimator.
///
/// Every round trip the number of arrivals becomes one sample of
/// `round(1.5 * arrivals) + 1`; once ten samples exist the window is their
/// mean and the oldest sample is dropped.
#[derive(Debug, Clone)]
pub struct WindowEstimator {
    samples: VecDeque<usize>,
    arrivals: usize,
    window: usize,
    last_sample: Option<Instant>,
}

impl Default for WindowEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowEstimator {
    /// Create an estimator at the initial window.
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(constants::SAMPLE_COUNT),
            arrivals: 0,
            window: constants::INITIAL_WINDOW,
            last_sample: None,
        }
    }

    /// Count one in-window arrival.
    pub fn record_arrival(&mut self) {
        self.arrivals += 1;
    }

    /// Take a sample if a round trip has passed since the last one.
    pub fn sample_at(&mut self, now: Instant, rtt: Duration) -> bool {
        let Some(last) = self.last_sample else {
            self.last_sample = Some(now);
            return false;
        };
        if now.saturating_duration_since(last) < rtt {
            return false;
        }
        self.last_sample = Some(now);

        let size = (self.arrivals as f64 * constants::WINDOW_SCALE).round() as usize + 1;
        self.arrivals = 0;
        self.samples.push_back(size);
        if self.samples.len() >= constants::SAMPLE_COUNT {
            self.window = self.samples.iter().sum::<usize>() / self.samples.len();
            self.samples.pop_front();
        }
        true
    }

    /// Current window.
    pub fn window(&self) -> usize {
        self.window
    }
}
