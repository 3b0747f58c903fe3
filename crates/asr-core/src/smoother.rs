//! Turns raw counter deltas into smoothed rate estimates.
//!
//! Owned exclusively by the controller and driven once per tick. Each tick
//! reads the counters at a single instant, computes deltas against the
//! previous tick with wrapping subtraction (so counter overflow is
//! harmless), converts them to rates over the elapsed interval, and folds
//! each rate into its [`Ewma`].
//!
//! The hot-miss signal is a fraction, not a rate. When the read handler
//! reports read attempts, the fraction is misses over reads; otherwise it
//! falls back to misses over applied records plus one, a stress proxy that
//! stays bounded when no replay happened during the interval. Either way
//! the raw fraction is clamped into [0, 1] before smoothing, so the
//! smoothed value can never leave that range.

use serde::{Deserialize, Serialize};

use crate::ewma::Ewma;
use crate::ingest::CounterSnapshot;

/// Interval assumed for the very first tick, when there is no previous
/// measurement to subtract from.
const FIRST_TICK_DT_SECS: f64 = 1.0;

/// Floor on the measurement interval. Keeps a fast double tick (or a clock
/// step backwards) from inflating rates by dividing by a tiny dt.
const MIN_DT_SECS: f64 = 0.1;

// =============================================================================
// RateEstimates
// =============================================================================

/// Smoothed rate estimates after one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateEstimates {
    /// Replay application rate (records/sec), the pending-work proxy.
    pub queue: f64,
    /// Hot-miss fraction in [0, 1].
    pub miss_rate: f64,
    /// WAL arrival rate (bytes/sec).
    pub wal_bps: f64,
}

// =============================================================================
// Smoother
// =============================================================================

/// Delta-and-EWMA state carried between ticks.
#[derive(Debug, Default)]
pub struct Smoother {
    tasks_prev: u64,
    misses_prev: u64,
    wal_prev: u64,
    reads_prev: u64,
    /// Timestamp of the previous tick (epoch ms); 0 means never ticked.
    t_prev_ms: u64,
    queue_ewma: Ewma,
    miss_rate_ewma: Ewma,
    wal_bps_ewma: Ewma,
}

impl Smoother {
    /// Create a zeroed smoother.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One measurement tick at `now_ms`.
    ///
    /// `alpha` is the EWMA weight read from the tick's configuration
    /// snapshot; it applies to all three signals for the whole tick.
    pub fn tick(&mut self, now_ms: u64, counters: CounterSnapshot, alpha: f64) -> RateEstimates {
        let dt = if self.t_prev_ms == 0 {
            FIRST_TICK_DT_SECS
        } else {
            (now_ms.saturating_sub(self.t_prev_ms) as f64 / 1000.0).max(MIN_DT_SECS)
        };

        // Wrapping subtraction keeps deltas correct across u64 overflow.
        let d_tasks = counters.tasks.wrapping_sub(self.tasks_prev);
        let d_misses = counters.misses.wrapping_sub(self.misses_prev);
        let d_wal = counters.wal_bytes.wrapping_sub(self.wal_prev);
        let d_reads = counters.read_attempts.wrapping_sub(self.reads_prev);

        let q_raw = sanitize(d_tasks as f64 / dt);
        let w_raw = sanitize(d_wal as f64 / dt);
        let m_raw = if d_reads > 0 {
            sanitize(d_misses as f64 / d_reads as f64).min(1.0)
        } else {
            sanitize(d_misses as f64 / (d_tasks as f64 + 1.0)).min(1.0)
        };

        self.queue_ewma.observe(q_raw, alpha);
        self.miss_rate_ewma.observe(m_raw, alpha);
        self.wal_bps_ewma.observe(w_raw, alpha);

        self.tasks_prev = counters.tasks;
        self.misses_prev = counters.misses;
        self.wal_prev = counters.wal_bytes;
        self.reads_prev = counters.read_attempts;
        self.t_prev_ms = now_ms;

        self.estimates()
    }

    /// Latest smoothed estimates without advancing the state.
    #[must_use]
    pub fn estimates(&self) -> RateEstimates {
        RateEstimates {
            queue: self.queue_ewma.value(),
            miss_rate: self.miss_rate_ewma.value(),
            wal_bps: self.wal_bps_ewma.value(),
        }
    }
}

/// Replace non-finite or negative intermediate values with zero.
fn sanitize(v: f64) -> f64 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}

// =============================================================================
// Tests
// =============================================================================
