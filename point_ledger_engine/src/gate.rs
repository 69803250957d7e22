//! # Lock & debounce gate
//!
//! Every multi-row read-then-write sequence in the engine runs while holding a [`LockGuard`]. Functions that must
//! only run under the lock take a `&LockGuard` argument as proof.
//!
//! Reactive recomputation (fired by incidental edits) additionally has to get past two checks:
//! * no explicit operation may be in flight. Explicit operations hold a [`ManualOperation`] token for their
//!   duration and recompute on their own once they are done.
//! * the target must not have run within the debounce window. An admitted trigger holds a [`DebounceClaim`]; if the
//!   recomputation fails the claim is dropped uncommitted and the window reopens.
use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::*;
use thiserror::Error;
use tokio::time::Instant;

use crate::{
    sheets::{attendance_layout, is_attendance_table, ledger_cols, LEDGER_TABLE},
    traits::{LockService, LockTimeout},
};

#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("{0}")]
    LockTimeout(#[from] LockTimeout),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecomputeTarget {
    Ledger,
    AttendanceTotals,
}

impl Display for RecomputeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecomputeTarget::Ledger => write!(f, "ledger"),
            RecomputeTarget::AttendanceTotals => write!(f, "attendance totals"),
        }
    }
}

/// Why a reactive trigger did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skipped {
    ManualOperationInProgress,
    Debounced { since_last_run: Duration },
}

#[derive(Debug, Default)]
pub struct GateState {
    last_run: HashMap<RecomputeTarget, Instant>,
    manual_operations: usize,
}

pub struct Gate<L: LockService> {
    lock: L,
    lock_timeout: Duration,
    debounce_window: Duration,
    state: Arc<Mutex<GateState>>,
}

fn state_of(state: &Mutex<GateState>) -> MutexGuard<'_, GateState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<L: LockService> Gate<L> {
    pub fn new(lock: L, lock_timeout: Duration, debounce_window: Duration) -> Self {
        Self { lock, lock_timeout, debounce_window, state: Arc::new(Mutex::new(GateState::default())) }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    /// Waits up to the configured timeout for the process-wide lock.
    pub async fn lock(&self) -> Result<LockGuard<'_, L>, GateError> {
        let token = self.lock.acquire(self.lock_timeout).await?;
        Ok(LockGuard { lock: &self.lock, token: Some(token) })
    }

    /// Marks the start of an explicit operation. Reactive triggers are skipped until the token is dropped.
    pub fn begin_manual(&self) -> ManualOperation {
        state_of(&self.state).manual_operations += 1;
        trace!("🚦 Manual operation started");
        ManualOperation { state: Arc::clone(&self.state) }
    }

    pub fn manual_in_progress(&self) -> bool {
        state_of(&self.state).manual_operations > 0
    }

    /// Tries to admit a reactive trigger for `target`. On success the debounce window is claimed immediately, so a
    /// concurrent trigger is dropped even before this one finishes.
    pub fn try_claim(&self, target: RecomputeTarget) -> Result<DebounceClaim, Skipped> {
        let mut state = state_of(&self.state);
        if state.manual_operations > 0 {
            debug!("🚦 Skipping {target} recompute: a manual operation is in progress");
            return Err(Skipped::ManualOperationInProgress);
        }
        let now = Instant::now();
        let previous = state.last_run.get(&target).copied();
        if let Some(last) = previous {
            let since_last_run = now.duration_since(last);
            if since_last_run < self.debounce_window {
                debug!("🚦 Debounced {target} recompute ({since_last_run:?} since the last run)");
                return Err(Skipped::Debounced { since_last_run });
            }
        }
        state.last_run.insert(target, now);
        Ok(DebounceClaim { state: Arc::clone(&self.state), target, previous, committed: false })
    }

    /// Records a successful explicit run, which restarts the target's debounce window.
    pub fn record_run(&self, target: RecomputeTarget) {
        state_of(&self.state).last_run.insert(target, Instant::now());
    }

    pub fn last_run(&self, target: RecomputeTarget) -> Option<Instant> {
        state_of(&self.state).last_run.get(&target).copied()
    }
}

/// Holds the process-wide lock. Released when dropped, on every exit path.
pub struct LockGuard<'a, L: LockService> {
    lock: &'a L,
    token: Option<L::Token>,
}

impl<'a, L: LockService> Drop for LockGuard<'a, L> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.release(token);
        }
    }
}

pub struct ManualOperation {
    state: Arc<Mutex<GateState>>,
}

impl Drop for ManualOperation {
    fn drop(&mut self) {
        let mut state = state_of(&self.state);
        state.manual_operations = state.manual_operations.saturating_sub(1);
        trace!("🚦 Manual operation finished");
    }
}

pub struct DebounceClaim {
    state: Arc<Mutex<GateState>>,
    target: RecomputeTarget,
    previous: Option<Instant>,
    committed: bool,
}

impl DebounceClaim {
    pub fn target(&self) -> RecomputeTarget {
        self.target
    }

    /// Keeps the claimed window. Call once the recomputation has succeeded.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for DebounceClaim {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut state = state_of(&self.state);
        match self.previous {
            Some(previous) => state.last_run.insert(self.target, previous),
            None => state.last_run.remove(&self.target),
        };
        debug!("🚦 {} recompute failed. Debounce window rolled back", self.target);
    }
}

//--------------------------------------     Edit filtering    ---------------------------------------------------------

/// A single cell edit reported by the datastore or an editor integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditEvent {
    pub table: String,
    pub row: usize,
    pub col: usize,
}

impl EditEvent {
    pub fn new<S: Into<String>>(table: S, row: usize, col: usize) -> Self {
        Self { table: table.into(), row, col }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditEffect {
    Ignore,
    /// The edit changes what the ledger shows, but not what it is computed from.
    InvalidateCache,
    Recompute(Vec<RecomputeTarget>),
}

/// Decides what an edit means. Only attendance checkboxes, member-name cells and ledger spend cells feed
/// recomputation. Hand edits to the ledger's balance columns only invalidate the cache.
pub fn classify_edit(edit: &EditEvent) -> EditEffect {
    if is_attendance_table(&edit.table) {
        use attendance_layout::*;
        if edit.row >= FIRST_MEMBER_ROW && (edit.col == MEMBER_COL || edit.col >= FIRST_SPAWN_COL) {
            return EditEffect::Recompute(vec![RecomputeTarget::Ledger, RecomputeTarget::AttendanceTotals]);
        }
        return EditEffect::Ignore;
    }
    if edit.table == LEDGER_TABLE && edit.row >= 1 {
        return match edit.col {
            ledger_cols::MEMBER => EditEffect::Recompute(vec![RecomputeTarget::Ledger]),
            ledger_cols::POINTS_LEFT | ledger_cols::POINTS_CONSUMED => EditEffect::InvalidateCache,
            _ => EditEffect::Recompute(vec![RecomputeTarget::Ledger]),
        };
    }
    EditEffect::Ignore
}
