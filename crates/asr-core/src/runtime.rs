//! Subsystem wiring and lifecycle.
//!
//! One [`Asr`] instance per storage node owns the counters, the budget
//! cell, the configuration cell, and the controller task:
//!
//! ```text
//! WAL receiver ───► record_wal_ingest ──┐
//! RPC handlers ───► record_hot_miss  ──┼──► counters ──► controller task
//! replay workers ─► record_replay_task ┘                   (every tick_ms)
//!        ▲                                                      │
//!        └────────────── budget cell ◄── snapshot ◄─────────────┘
//! ```
//!
//! The configuration is published as a whole through an [`ArcSwap`], so a
//! tick reads one consistent snapshot and a reconfiguration never tears.
//! The ingest fast path reads only a mirrored `enabled` atomic.
//!
//! Server bootstrap calls [`init`] then [`start_controller`]; shutdown
//! calls [`shutdown`], which signals the task and joins it within one tick.
//! The free functions at the bottom of this module operate on the
//! process-wide instance for collaborators that are wired at link time
//! rather than by dependency injection.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::budget::BudgetCell;
use crate::config::{AsrConfig, DEFAULT_B_MIN};
use crate::controller::{Controller, ControllerState, MetricsSnapshot, TickReport};
use crate::error::{Error, Result};
use crate::ingest::{CounterSnapshot, ReplayCounters};

/// Epoch-milliseconds timestamp.
fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Asr
// =============================================================================

/// The adaptive replay subsystem: metric ingest, controller, and the
/// published budget, behind one handle.
#[derive(Debug)]
pub struct Asr {
    config: ArcSwap<AsrConfig>,
    /// Hot-path mirror of `config.enabled`; ingest reads only this.
    enabled: AtomicBool,
    counters: ReplayCounters,
    budget: BudgetCell,
    snapshot: RwLock<MetricsSnapshot>,
    state: AtomicU8,
    controller: Mutex<Option<ControllerHandle>>,
}

impl Default for Asr {
    fn default() -> Self {
        Self::new()
    }
}

impl Asr {
    /// Create a subsystem with default configuration (disabled, budget at
    /// the floor).
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(AsrConfig::default())
    }

    /// Create a subsystem with a validated configuration.
    pub fn with_config(config: AsrConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: AsrConfig) -> Self {
        let snapshot = MetricsSnapshot {
            budget: config.b_min,
            ..MetricsSnapshot::default()
        };
        Self {
            enabled: AtomicBool::new(config.enabled),
            counters: ReplayCounters::new(),
            budget: BudgetCell::new(config.b_min),
            snapshot: RwLock::new(snapshot),
            state: AtomicU8::new(ControllerState::Stopped.as_u8()),
            controller: Mutex::new(None),
            config: ArcSwap::from_pointee(config),
        }
    }

    // -------------------------------------------------------------------------
    // Ingest (hot path)
    // -------------------------------------------------------------------------

    /// Record `n` applied replay records. Wait-free; no-op while disabled.
    #[inline]
    pub fn record_replay_task(&self, n: u32) {
        if n == 0 || !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.counters.add_tasks(u64::from(n));
    }

    /// Record one read that must wait for replay to catch up. Wait-free;
    /// no-op while disabled.
    #[inline]
    pub fn record_hot_miss(&self) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.counters.add_miss();
    }

    /// Record `bytes` of WAL received from a compute node. Wait-free;
    /// no-op while disabled.
    #[inline]
    pub fn record_wal_ingest(&self, bytes: u64) {
        if bytes == 0 || !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.counters.add_wal_bytes(bytes);
    }

    /// Record one page-read attempt, hit or miss. Optional; when the read
    /// handler reports these, the miss fraction becomes misses over reads
    /// instead of the replay-rate proxy. Wait-free; no-op while disabled.
    #[inline]
    pub fn record_read_attempt(&self) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.counters.add_read_attempt();
    }

    // -------------------------------------------------------------------------
    // Readers
    // -------------------------------------------------------------------------

    /// Current replay budget (acquire load, wait-free).
    #[inline]
    #[must_use]
    pub fn budget(&self) -> u32 {
        self.budget.get()
    }

    /// Latest published metrics snapshot, by value.
    #[must_use]
    pub fn read_metrics(&self) -> MetricsSnapshot {
        match self.snapshot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Current configuration, by value.
    #[must_use]
    pub fn config(&self) -> AsrConfig {
        AsrConfig::clone(&self.config.load())
    }

    /// Lifecycle state of the controller task.
    #[must_use]
    pub fn controller_state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Raw cumulative counters, read at a single instant.
    ///
    /// Diagnostic surface; the smoothed view is [`Asr::read_metrics`].
    #[must_use]
    pub fn counter_snapshot(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Validate and install a new configuration as a whole.
    ///
    /// On rejection the prior configuration stays installed. On success the
    /// published budget is clamped into the new range immediately rather
    /// than waiting for the next tick, so the bounds invariant holds across
    /// the swap.
    pub fn update_config(&self, config: AsrConfig) -> Result<()> {
        if let Err(err) = config.validate() {
            warn!(target: "asr", %err, "rejecting configuration update");
            return Err(Error::InvalidConfig(err));
        }

        let enabled = config.enabled;
        let clamped = self.budget.get().clamp(config.b_min, config.b_max);
        self.config.store(Arc::new(config));
        self.enabled.store(enabled, Ordering::Relaxed);
        self.budget.set(clamped);

        info!(target: "asr", enabled, "configuration updated");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the periodic controller task.
    ///
    /// A no-op when the subsystem is disabled or the task is already
    /// running. Requires a tokio runtime; without one this logs a warning
    /// and leaves the subsystem stopped, with the budget at its floor.
    pub fn start_controller(self: &Arc<Self>) -> Result<()> {
        if !self.config.load().enabled {
            info!(target: "asr", "controller not started (disabled via configuration)");
            return Ok(());
        }

        let mut guard = match self.controller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            debug!(target: "asr", "controller already running");
            return Ok(());
        }

        if tokio::runtime::Handle::try_current().is_err() {
            warn!(target: "asr", "failed to start controller: no async runtime");
            return Err(Error::ControllerUnavailable("no async runtime"));
        }

        *guard = Some(spawn_controller(Arc::clone(self)));
        self.state
            .store(ControllerState::Running.as_u8(), Ordering::SeqCst);
        info!(target: "asr", "controller task started");
        Ok(())
    }

    /// Request controller stop and wait for the task to exit.
    ///
    /// The task checks the stop flag at the top of each cycle, so shutdown
    /// completes within one tick interval. Idempotent.
    pub async fn shutdown(&self) {
        let handle = {
            let mut guard = match self.controller.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        let Some(handle) = handle else {
            return;
        };

        self.state
            .store(ControllerState::Draining.as_u8(), Ordering::SeqCst);
        handle.signal_shutdown();
        handle.join().await;
        self.state
            .store(ControllerState::Stopped.as_u8(), Ordering::SeqCst);
        info!(target: "asr", "controller task shut down");
    }

    // -------------------------------------------------------------------------
    // Tick publication
    // -------------------------------------------------------------------------

    /// Run one controller cycle and publish its results.
    fn run_tick(&self, controller: &mut Controller, cfg: &AsrConfig) {
        let report = controller.tick(epoch_ms(), cfg, &self.counters, self.budget.get());
        self.publish(&report, cfg);
    }

    fn publish(&self, report: &TickReport, cfg: &AsrConfig) {
        // Snapshot first, then the release store of the budget: a reader
        // that observes the new budget can rely on the snapshot that
        // produced it.
        {
            let mut guard = match self.snapshot.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = report.snapshot();
        }
        if report.budget_changed {
            self.budget.set(report.budget);
        }

        if cfg.verbose {
            info!(
                target: "asr",
                "metrics: queue={:.2} miss_rate={:.4} wal_bps={:.0} pressures(q={:.2} m={:.2} w={:.2}) agg={:.2} budget={}",
                report.estimates.queue,
                report.estimates.miss_rate,
                report.estimates.wal_bps,
                report.queue_pressure,
                report.miss_pressure,
                report.wal_pressure,
                report.aggressiveness,
                report.budget,
            );
        }
    }
}

// =============================================================================
// Controller task
// =============================================================================

/// Handle to the running controller task.
#[derive(Debug)]
struct ControllerHandle {
    task: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl ControllerHandle {
    /// Ask the task to stop at the top of its next cycle.
    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Wait for the task to finish.
    async fn join(self) {
        let _ = self.task.await;
    }
}

/// Spawn the periodic control loop.
///
/// Each cycle reads one configuration snapshot; a disabled configuration
/// skips the tick entirely (no smoothing, no budget write) but keeps the
/// task alive so re-enabling takes effect without a restart.
fn spawn_controller(shared: Arc<Asr>) -> ControllerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    let task = tokio::spawn(async move {
        let mut controller = Controller::new();
        loop {
            if flag.load(Ordering::SeqCst) {
                break;
            }
            let cfg = shared.config.load_full();
            if cfg.enabled {
                shared.run_tick(&mut controller, &cfg);
            }
            tokio::time::sleep(Duration::from_millis(cfg.tick_ms.max(1))).await;
        }
    });

    ControllerHandle { task, shutdown }
}

// =============================================================================
// Process-wide instance
// =============================================================================

static GLOBAL: OnceLock<Arc<Asr>> = OnceLock::new();

fn global() -> Option<&'static Arc<Asr>> {
    GLOBAL.get()
}

/// Install the process-wide subsystem with default configuration.
///
/// Idempotent: the first call creates the instance, later calls return the
/// existing one untouched.
pub fn init() -> Arc<Asr> {
    let asr = GLOBAL.get_or_init(|| {
        let asr = Arc::new(Asr::new());
        info!(
            target: "asr",
            enabled = asr.enabled.load(Ordering::Relaxed),
            "adaptive replay initialized"
        );
        asr
    });
    Arc::clone(asr)
}

/// Start the process-wide controller task. Installs the subsystem first if
/// needed. See [`Asr::start_controller`].
pub fn start_controller() -> Result<()> {
    init().start_controller()
}

/// Stop the process-wide controller task and wait for it to exit.
pub async fn shutdown() {
    if let Some(asr) = global() {
        asr.shutdown().await;
    }
}

/// Record `n` applied replay records on the process-wide instance.
/// No-op before [`init`].
#[inline]
pub fn record_replay_task(n: u32) {
    if let Some(asr) = global() {
        asr.record_replay_task(n);
    }
}

/// Record one read blocked on replay on the process-wide instance.
/// No-op before [`init`].
#[inline]
pub fn record_hot_miss() {
    if let Some(asr) = global() {
        asr.record_hot_miss();
    }
}

/// Record received WAL bytes on the process-wide instance.
/// No-op before [`init`].
#[inline]
pub fn record_wal_ingest(bytes: u64) {
    if let Some(asr) = global() {
        asr.record_wal_ingest(bytes);
    }
}

/// Record one page-read attempt on the process-wide instance.
/// No-op before [`init`].
#[inline]
pub fn record_read_attempt() {
    if let Some(asr) = global() {
        asr.record_read_attempt();
    }
}

/// Current replay budget of the process-wide instance; the default floor
/// before [`init`].
#[inline]
#[must_use]
pub fn get_budget() -> u32 {
    global().map_or(DEFAULT_B_MIN, |asr| asr.budget())
}

/// Latest metrics snapshot of the process-wide instance.
#[must_use]
pub fn read_metrics() -> MetricsSnapshot {
    global().map_or(
        MetricsSnapshot {
            budget: DEFAULT_B_MIN,
            ..MetricsSnapshot::default()
        },
        |asr| asr.read_metrics(),
    )
}

/// Current configuration of the process-wide instance.
#[must_use]
pub fn get_config() -> AsrConfig {
    global().map_or_else(AsrConfig::default, |asr| asr.config())
}

/// Update the process-wide configuration. Installs the subsystem first if
/// needed. See [`Asr::update_config`].
pub fn update_config(config: AsrConfig) -> Result<()> {
    init().update_config(config)
}

// =============================================================================
// Tests
// =============================================================================
