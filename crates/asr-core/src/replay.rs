//! Budget-bounded WAL redo driver.
//!
//! The replay worker's inner loop follows a fixed discipline so the budget
//! can bound work without touching correctness:
//!
//! 1. read the published budget exactly once at entry;
//! 2. apply records in strict LSN order, never skipping;
//! 3. after each successful apply, record one replay task;
//! 4. return when the stream is exhausted, the target is reached, or the
//!    budget is used up. The caller invokes the worker again to continue.
//!
//! The budget only decides when the loop exits. Which records are applied,
//! in what order, and what they do to pages is entirely the stream's
//! business, so page images and multi-version semantics are identical to an
//! unbounded loop. [`apply_until`] additionally verifies that each applied
//! record advances the frontier and refuses to continue past a regression.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::Asr;

/// Monotonic position in the write-ahead log.
pub type Lsn = u64;

// =============================================================================
// RedoStream
// =============================================================================

/// A sequential source of decoded WAL records positioned at the replay
/// frontier.
///
/// Implemented by the WAL reader / redo dispatch collaborator. The stream
/// owns decoding and application; this crate only drives the loop.
pub trait RedoStream {
    /// Error produced by reading or applying a record.
    type Error: std::error::Error + Send + Sync + 'static;

    /// End LSN of the last applied record.
    fn frontier(&self) -> Lsn;

    /// Decode and apply the next record, returning its end LSN, or `None`
    /// when no further records are available.
    fn apply_next(&mut self) -> Result<Option<Lsn>, Self::Error>;
}

// =============================================================================
// Outcome
// =============================================================================

/// Why an apply pass returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The stream had no more records.
    Exhausted,
    /// The frontier reached the requested target.
    TargetReached,
    /// The budget for this pass was used up; call again to continue.
    BudgetExhausted,
}

/// Result of one budget-bounded apply pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    /// Records applied during this pass.
    pub applied: u32,
    /// The budget that bounded the pass, read once at entry.
    pub budget: u32,
    /// Frontier after the pass.
    pub frontier: Lsn,
    pub stop: StopReason,
}

/// Failure of an apply pass.
#[derive(Debug, Error)]
pub enum ReplayError<E: std::error::Error + 'static> {
    /// A record's end LSN did not advance the frontier. Applying further
    /// records could silently skip or repeat work, so the pass aborts.
    #[error("wal record did not advance the replay frontier: {prev} -> {next}")]
    OutOfOrder { prev: Lsn, next: Lsn },

    /// The underlying stream failed to read or apply a record.
    #[error("redo stream failed")]
    Source(#[source] E),
}

// =============================================================================
// Driver
// =============================================================================

/// Apply records from `stream` until `target`, bounded by the published
/// budget.
///
/// Reads the budget once; a controller update mid-pass takes effect on the
/// next pass. Each applied record is fed back to the metrics via
/// [`Asr::record_replay_task`].
pub fn apply_until<S: RedoStream>(
    asr: &Asr,
    stream: &mut S,
    target: Lsn,
) -> Result<ReplayOutcome, ReplayError<S::Error>> {
    let budget = asr.budget();
    let mut applied: u32 = 0;

    loop {
        if stream.frontier() >= target {
            return Ok(outcome(applied, budget, stream, StopReason::TargetReached));
        }

        let prev = stream.frontier();
        let Some(end) = stream.apply_next().map_err(ReplayError::Source)? else {
            return Ok(outcome(applied, budget, stream, StopReason::Exhausted));
        };
        if end <= prev {
            return Err(ReplayError::OutOfOrder { prev, next: end });
        }

        asr.record_replay_task(1);
        applied += 1;
        if applied >= budget {
            return Ok(outcome(applied, budget, stream, StopReason::BudgetExhausted));
        }
    }
}

fn outcome<S: RedoStream>(
    applied: u32,
    budget: u32,
    stream: &S,
    stop: StopReason,
) -> ReplayOutcome {
    ReplayOutcome {
        applied,
        budget,
        frontier: stream.frontier(),
        stop,
    }
}

// =============================================================================
// Tests
// =============================================================================
