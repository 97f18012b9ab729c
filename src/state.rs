// =============================================================================
// Shared Bot State — session counters and per-cycle summaries
// =============================================================================
//
// Advisory state only: the status API and the log lines read it, but trade
// correctness never depends on it — positions and orders are always re-read
// from the exchange before they are acted on.
//
// Thread safety: parking_lot::RwLock plus one atomic cycle counter.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::decision::Decision;
use crate::executor::ExecutionOutcome;
use crate::types::PositionInfo;

/// Session counters, captured at scheduler start.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub started_at: DateTime<Utc>,
    pub call_count: u64,
    pub running: bool,
    pub strategy: String,
    pub dry_run: bool,
}

/// Digest of one completed analysis cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub finished_at: DateTime<Utc>,
    pub decisions: usize,
    pub executable: usize,
    pub executed: usize,
    pub failed: usize,
    pub partial_snapshot: bool,
    pub duration_secs: f64,
}

/// Process-wide shared state behind `Arc<BotState>`.
pub struct BotState {
    started_at: DateTime<Utc>,
    strategy: String,
    dry_run: bool,
    call_count: AtomicU64,
    running: AtomicBool,
    last_cycle: RwLock<Option<CycleSummary>>,
    /// Last cycle's decisions (advisory, for the status API).
    decisions: RwLock<Vec<Decision>>,
    /// Last cycle's execution outcomes (advisory).
    outcomes: RwLock<Vec<ExecutionOutcome>>,
    /// Last known positions (advisory, for logging only).
    positions: RwLock<Vec<PositionInfo>>,
}

impl BotState {
    pub fn new(strategy: String, dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            strategy,
            dry_run,
            call_count: AtomicU64::new(0),
            running: AtomicBool::new(true),
            last_cycle: RwLock::new(None),
            decisions: RwLock::new(Vec::new()),
            outcomes: RwLock::new(Vec::new()),
            positions: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------

    pub fn elapsed_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    /// Increment and return the new cycle number.
    pub fn next_call(&self) -> u64 {
        self.call_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn session_info(&self) -> SessionInfo {
        SessionInfo {
            started_at: self.started_at,
            call_count: self.call_count(),
            running: self.is_running(),
            strategy: self.strategy.clone(),
            dry_run: self.dry_run,
        }
    }

    // -------------------------------------------------------------------------
    // Cycle results
    // -------------------------------------------------------------------------

    pub fn record_cycle(
        &self,
        summary: CycleSummary,
        decisions: Vec<Decision>,
        outcomes: Vec<ExecutionOutcome>,
        positions: Vec<PositionInfo>,
    ) {
        *self.last_cycle.write() = Some(summary);
        *self.decisions.write() = decisions;
        *self.outcomes.write() = outcomes;
        *self.positions.write() = positions;
    }

    pub fn last_cycle(&self) -> Option<CycleSummary> {
        self.last_cycle.read().clone()
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions.read().clone()
    }

    pub fn outcomes(&self) -> Vec<ExecutionOutcome> {
        self.outcomes.read().clone()
    }

    pub fn positions(&self) -> Vec<PositionInfo> {
        self.positions.read().clone()
    }
}

impl std::fmt::Debug for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotState")
            .field("started_at", &self.started_at)
            .field("call_count", &self.call_count())
            .field("running", &self.is_running())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_counter_is_monotonic() {
        let state = BotState::new("default".into(), true);
        assert_eq!(state.call_count(), 0);
        assert_eq!(state.next_call(), 1);
        assert_eq!(state.next_call(), 2);
        assert_eq!(state.call_count(), 2);
    }

    #[test]
    fn stop_flips_running() {
        let state = BotState::new("default".into(), false);
        assert!(state.is_running());
        state.stop();
        assert!(!state.is_running());
        assert!(!state.session_info().running);
    }

    #[test]
    fn cycle_record_replaces_previous() {
        let state = BotState::new("default".into(), true);
        assert!(state.last_cycle().is_none());

        let summary = CycleSummary {
            cycle: 1,
            finished_at: Utc::now(),
            decisions: 2,
            executable: 1,
            executed: 1,
            failed: 0,
            partial_snapshot: false,
            duration_secs: 3.2,
        };
        state.record_cycle(summary, Vec::new(), Vec::new(), Vec::new());
        assert_eq!(state.last_cycle().unwrap().cycle, 1);
        assert!(state.decisions().is_empty());
    }
}
