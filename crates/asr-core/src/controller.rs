//! The replay budget control loop.
//!
//! Runs once per tick on a dedicated task (see [`crate::runtime`]) and turns
//! smoothed pressure signals into the published budget:
//!
//! ```text
//! counters ──► Smoother ──► press(x, x*) per signal ──► weighted sum
//!                                                            │
//!          budget cell ◄── hysteresis ◄── [b_min, b_max] ◄── step-limited
//!                                              map           aggressiveness
//! ```
//!
//! Two damping mechanisms keep the loop from oscillating. The step limit
//! bounds how fast aggressiveness may move per tick, applied before the
//! budget map so the ramp rate does not depend on the configured budget
//! range. Hysteresis is applied after the map, in budget units, and absorbs
//! integer-boundary jitter when aggressiveness hovers near a threshold.
//!
//! [`Controller::tick`] is deterministic: it takes an explicit timestamp and
//! returns everything it computed, and the caller publishes the result.
//! Scenario tests drive it with simulated time.

use serde::{Deserialize, Serialize};

use crate::config::AsrConfig;
use crate::ingest::ReplayCounters;
use crate::smoother::{RateEstimates, Smoother};

// =============================================================================
// Pressure
// =============================================================================

/// Normalized pressure of a raw signal against its healthy reference.
///
/// Zero at or below the reference, rising linearly to saturate at 1 when the
/// signal reaches twice the reference. A NaN ratio (pathological division)
/// counts as no pressure for the tick.
#[must_use]
pub fn pressure(raw: f64, reference: f64) -> f64 {
    if raw <= reference {
        return 0.0;
    }
    let e = raw / reference - 1.0;
    if e.is_nan() { 0.0 } else { e.clamp(0.0, 1.0) }
}

/// Map aggressiveness in [0, 1] onto the configured budget range.
#[must_use]
pub fn budget_for(aggressiveness: f64, cfg: &AsrConfig) -> u32 {
    let a = aggressiveness.clamp(0.0, 1.0);
    let span = f64::from(cfg.b_max - cfg.b_min);
    let b = (f64::from(cfg.b_min) + a * span).floor() as u32;
    b.clamp(cfg.b_min, cfg.b_max)
}

// =============================================================================
// Controller state
// =============================================================================

/// Lifecycle state of the controller task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// No task running; the published budget stays at its floor.
    Stopped,
    /// The periodic task is ticking.
    Running,
    /// Shutdown requested; the task finishes its current cycle and exits.
    Draining,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

impl ControllerState {
    /// Numeric value for atomic storage.
    #[must_use]
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Draining => 2,
        }
    }

    #[must_use]
    pub(crate) const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

// =============================================================================
// MetricsSnapshot
// =============================================================================

/// Latest published controller observation, readable by any thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Smoothed replay application rate (records/sec).
    pub queue_ewma: f64,
    /// Smoothed hot-miss fraction in [0, 1].
    pub miss_rate_ewma: f64,
    /// Smoothed WAL arrival rate (bytes/sec).
    pub wal_bps_ewma: f64,
    /// Step-limited aggressiveness in [0, 1].
    pub aggressiveness: f64,
    /// Budget in effect after the tick.
    pub budget: u32,
    /// Timestamp of the tick that produced this snapshot (epoch ms).
    pub last_tick_ms: u64,
}

// =============================================================================
// TickReport
// =============================================================================

/// Everything one tick computed, for publication and logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub estimates: RateEstimates,
    /// Normalized pressures in [0, 1].
    pub queue_pressure: f64,
    pub miss_pressure: f64,
    pub wal_pressure: f64,
    /// Aggressiveness after step limiting.
    pub aggressiveness: f64,
    /// Budget in effect after hysteresis.
    pub budget: u32,
    /// Whether `budget` differs from the previously published value.
    pub budget_changed: bool,
    /// Tick timestamp (epoch ms).
    pub now_ms: u64,
}

impl TickReport {
    /// The observable snapshot for this tick.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_ewma: self.estimates.queue,
            miss_rate_ewma: self.estimates.miss_rate,
            wal_bps_ewma: self.estimates.wal_bps,
            aggressiveness: self.aggressiveness,
            budget: self.budget,
            last_tick_ms: self.now_ms,
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// The deterministic tick core. Owned by the controller task; never shared.
#[derive(Debug, Default)]
pub struct Controller {
    smoother: Smoother,
    agg_prev: f64,
}

impl Controller {
    /// Create a controller with zeroed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one control cycle at `now_ms`.
    ///
    /// `published_budget` is the value currently in the budget cell; the
    /// caller stores `report.budget` only when `report.budget_changed`.
    pub fn tick(
        &mut self,
        now_ms: u64,
        cfg: &AsrConfig,
        counters: &ReplayCounters,
        published_budget: u32,
    ) -> TickReport {
        let estimates = self.smoother.tick(now_ms, counters.snapshot(), cfg.ewma_alpha);

        let e_q = pressure(estimates.queue, cfg.q_star);
        let e_m = pressure(estimates.miss_rate, cfg.r_star);
        let e_w = pressure(estimates.wal_bps, cfg.w_star);

        let mut agg = cfg.w_q * e_q + cfg.w_m * e_m + cfg.w_w * e_w;
        agg = if agg.is_finite() { agg.clamp(0.0, 1.0) } else { 0.0 };

        // Step limit: even a wild excursion in the inputs (including a
        // nonsense wrap delta from a regressed counter) moves the output
        // by at most max_step per tick.
        let delta = agg - self.agg_prev;
        if delta.abs() > cfg.max_step {
            agg = if delta > 0.0 {
                self.agg_prev + cfg.max_step
            } else {
                self.agg_prev - cfg.max_step
            };
        }
        agg = agg.clamp(0.0, 1.0);
        self.agg_prev = agg;

        let target = budget_for(agg, cfg);

        // Hysteresis: small moves keep the published value. The held value
        // is re-clamped because a config swap since it was published may
        // have narrowed the range.
        let (budget, budget_changed) = if target.abs_diff(published_budget) < cfg.hyst {
            let held = published_budget.clamp(cfg.b_min, cfg.b_max);
            (held, held != published_budget)
        } else {
            (target, target != published_budget)
        };

        TickReport {
            estimates,
            queue_pressure: e_q,
            miss_pressure: e_m,
            wal_pressure: e_w,
            aggressiveness: agg,
            budget,
            budget_changed,
            now_ms,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
