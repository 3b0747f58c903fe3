//! Lock-free counters for hot-path metric ingest.
//!
//! Three monotonic counters feed the controller: replay tasks applied,
//! hot-miss events, and WAL bytes received, plus an optional read-attempt
//! counter for callers that can report total read traffic. All updates are
//! relaxed `fetch_add` on an aligned 64-bit word: no locks, no allocation,
//! no suspension, constant time. The controller is the only reader and only
//! needs approximate rates, so no inter-writer ordering is required.
//!
//! Counters are allowed to wrap. The smoother computes deltas with
//! `wrapping_sub`, so overflow is transparent to the control loop.
//!
//! Each counter sits on its own cache line to keep unrelated writers
//! (replay workers, RPC handlers, the WAL receiver) from false sharing.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cache-line-padded slot
// ---------------------------------------------------------------------------

/// A single atomic u64 padded to a full cache line.
///
/// 128-byte alignment covers both x86_64 (64-byte cache line, with adjacent
/// prefetch protection) and Apple Silicon (128-byte cache line).
#[repr(align(128))]
#[derive(Debug, Default)]
struct PaddedAtomicU64 {
    value: AtomicU64,
}

// ---------------------------------------------------------------------------
// ReplayCounters
// ---------------------------------------------------------------------------

/// The raw monotonic counters updated by hot-path callers.
///
/// # Thread Safety
///
/// Fully `Send + Sync`. Any number of concurrent writers; wait-free.
#[derive(Debug, Default)]
pub struct ReplayCounters {
    tasks: PaddedAtomicU64,
    misses: PaddedAtomicU64,
    wal_bytes: PaddedAtomicU64,
    read_attempts: PaddedAtomicU64,
}

impl ReplayCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` applied replay records.
    #[inline]
    pub fn add_tasks(&self, n: u64) {
        self.tasks.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one read that had to wait for replay.
    #[inline]
    pub fn add_miss(&self) {
        self.misses.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `bytes` of received WAL.
    #[inline]
    pub fn add_wal_bytes(&self, bytes: u64) {
        self.wal_bytes.value.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one page-read attempt (served or not).
    #[inline]
    pub fn add_read_attempt(&self) {
        self.read_attempts.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters at a single instant (relaxed loads).
    ///
    /// Increments racing with the read show up one tick later at worst.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tasks: self.tasks.value.load(Ordering::Relaxed),
            misses: self.misses.value.load(Ordering::Relaxed),
            wal_bytes: self.wal_bytes.value.load(Ordering::Relaxed),
            read_attempts: self.read_attempts.value.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// CounterSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time raw counter values.
///
/// Values are cumulative since process start and wrap modulo 2^64.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub tasks: u64,
    pub misses: u64,
    pub wal_bytes: u64,
    pub read_attempts: u64,
}

// =============================================================================
// Tests
// =============================================================================
