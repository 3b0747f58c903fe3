//! Controller configuration.
//!
//! All knobs live in a single [`AsrConfig`] struct that is published
//! atomically as a whole (see [`crate::runtime`]): the controller reads one
//! consistent snapshot per tick, and the ingest fast path reads only a
//! mirrored `enabled` flag. Updates are validated before they are installed;
//! a rejected update leaves the prior configuration in place.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest replay budget handed out when nothing is configured yet.
///
/// Matches `AsrConfig::default().b_min`; used as the safe fallback by
/// readers that run before the subsystem is installed.
pub const DEFAULT_B_MIN: u32 = 10;

// =============================================================================
// Configuration
// =============================================================================

/// Tunable parameters for the adaptive replay controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Master switch. When false, ingest and controller ticks are no-ops.
    pub enabled: bool,
    /// Emit one log line per controller tick with the smoothed metrics.
    pub verbose: bool,
    /// Healthy replay application rate (records/sec).
    pub q_star: f64,
    /// Healthy hot-miss fraction in [0, 1].
    pub r_star: f64,
    /// Healthy WAL ingest rate (bytes/sec).
    pub w_star: f64,
    /// Minimum replay budget (records per worker pass), at least 1.
    pub b_min: u32,
    /// Maximum replay budget (records per worker pass), above `b_min`.
    pub b_max: u32,
    /// Pressure weight: replay application rate.
    pub w_q: f64,
    /// Pressure weight: hot-miss fraction. Dominates by default because it
    /// is the signal closest to user-visible read latency.
    pub w_m: f64,
    /// Pressure weight: WAL ingest rate.
    pub w_w: f64,
    /// Minimum budget change required before a new value is published.
    pub hyst: u32,
    /// Cap on the per-tick change of aggressiveness, in (0, 1].
    pub max_step: f64,
    /// EWMA weight on the newest sample, in (0, 1].
    pub ewma_alpha: f64,
    /// Controller cycle length in milliseconds.
    pub tick_ms: u64,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verbose: false,
            q_star: 100.0,
            r_star: 0.05,
            w_star: 10.0 * 1024.0 * 1024.0, // 10 MiB/s
            b_min: DEFAULT_B_MIN,
            b_max: 2000,
            w_q: 0.3,
            w_m: 0.6,
            w_w: 0.1,
            hyst: 20,
            max_step: 0.2,
            ewma_alpha: 0.3,
            tick_ms: 200,
        }
    }
}

impl AsrConfig {
    /// Check every field against its documented range.
    ///
    /// Returns the first violation found. A config that fails validation is
    /// never installed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.b_min < 1 || self.b_max <= self.b_min {
            return Err(ConfigError::BudgetBounds {
                b_min: self.b_min,
                b_max: self.b_max,
            });
        }
        for (name, value) in [("w_q", self.w_q), ("w_m", self.w_m), ("w_w", self.w_w)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Weight { name, value });
            }
        }
        let sum = self.w_q + self.w_m + self.w_w;
        if sum > 1.0 {
            return Err(ConfigError::WeightSum { sum });
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(ConfigError::Alpha(self.ewma_alpha));
        }
        if !(self.max_step > 0.0 && self.max_step <= 1.0) {
            return Err(ConfigError::MaxStep(self.max_step));
        }
        for (name, value) in [("q_star", self.q_star), ("w_star", self.w_star)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Reference { name, value });
            }
        }
        if !(self.r_star > 0.0 && self.r_star <= 1.0) {
            return Err(ConfigError::MissReference(self.r_star));
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::TickInterval);
        }
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A configuration field outside its documented range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("budget bounds invalid: b_min={b_min} b_max={b_max} (need 1 <= b_min < b_max)")]
    BudgetBounds { b_min: u32, b_max: u32 },

    #[error("pressure weight {name} must be finite and nonnegative, got {value}")]
    Weight { name: &'static str, value: f64 },

    #[error("pressure weights sum to {sum}, must not exceed 1.0")]
    WeightSum { sum: f64 },

    #[error("ewma_alpha must be in (0, 1], got {0}")]
    Alpha(f64),

    #[error("max_step must be in (0, 1], got {0}")]
    MaxStep(f64),

    #[error("reference {name} must be positive and finite, got {value}")]
    Reference { name: &'static str, value: f64 },

    #[error("r_star must be in (0, 1], got {0}")]
    MissReference(f64),

    #[error("tick_ms must be at least 1")]
    TickInterval,
}

// =============================================================================
// Tests
// =============================================================================
