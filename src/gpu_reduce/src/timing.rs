//! Wall-clock timing for the oracle and the performance probe.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Start/stop timer reporting elapsed milliseconds.
///
/// A running timer reports the time since [`Timer::start`]; a stopped one
/// reports the interval between start and stop.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
    stop: Option<Instant>,
}

impl Timer {
    /// Create a timer that is already running.
    #[inline]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            stop: None,
        }
    }

    /// Restart from now.
    #[inline]
    pub fn restart(&mut self) {
        self.start = Instant::now();
        self.stop = None;
    }

    /// Freeze the elapsed interval.
    #[inline]
    pub fn stop(&mut self) {
        self.stop = Some(Instant::now());
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.stop.unwrap_or_else(Instant::now) - self.start
    }

    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

/// Smallest interval reported, in milliseconds.
const MIN_RESOLVED_MS: f64 = 1.0e-9;

/// Average latency and throughput over repeated runs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Throughput {
    /// Average milliseconds per run.
    pub avg_ms: f64,
    /// Billions of elements reduced per second.
    pub gelem_per_s: f64,
}

impl Throughput {
    /// Throughput of `iterations` runs over `elements` taking `total_ms`.
    pub fn from_total(elements: usize, iterations: u32, total_ms: f64) -> Self {
        let avg_ms = total_ms / f64::from(iterations.max(1));
        // Clock resolution can report zero for tiny inputs.
        let avg_ms = avg_ms.max(MIN_RESOLVED_MS);
        Self {
            avg_ms,
            gelem_per_s: 1.0e-6 * elements as f64 / avg_ms,
        }
    }
}
