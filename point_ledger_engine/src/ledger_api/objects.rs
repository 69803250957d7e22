use ledger_common::Points;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{AuctionItem, ItemId, MemberBalance, MemberKey, SessionId, SpawnKey},
    gate::{EditEffect, RecomputeTarget, Skipped},
    ledger_api::errors::LedgerWarning,
};

//--------------------------------------      Reconciling      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub balances: Vec<MemberBalance>,
    pub warnings: Vec<LedgerWarning>,
    /// How many passes it took. Anything above 1 means a write failed and the pass was redone from a fresh read.
    pub attempts: u32,
}

impl ReconcileResult {
    pub fn balance(&self, key: &MemberKey) -> Option<&MemberBalance> {
        self.balances.iter().find(|b| &b.key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceTotal {
    pub member: String,
    pub key: MemberKey,
    pub total_credit: Points,
    pub spawns_attended: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsResult {
    pub totals: Vec<AttendanceTotal>,
    pub warnings: Vec<LedgerWarning>,
}

//--------------------------------------      Attendance       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceResult {
    /// The weekly period table the spawn column was written to.
    pub table: String,
    pub column: usize,
    pub spawn: SpawnKey,
    /// Members ticked for this spawn.
    pub recorded: usize,
    /// Members that had no row in the period table yet.
    pub new_members: usize,
    /// Names that repeated an earlier name in the submission, once normalized.
    pub duplicates_ignored: usize,
    pub warnings: Vec<LedgerWarning>,
}

//--------------------------------------        Reading        ---------------------------------------------------------
/// The point map: every ledger member and their stored balances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balances: Vec<MemberBalance>,
}

impl LedgerSnapshot {
    pub fn get(&self, key: &MemberKey) -> Option<&MemberBalance> {
        self.balances.iter().find(|b| &b.key == key)
    }

    pub fn points_left(&self, key: &MemberKey) -> Option<Points> {
        self.get(key).map(|b| b.points_left)
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerView {
    pub snapshot: LedgerSnapshot,
    /// True if the snapshot was served from the cache rather than read from the datastore.
    pub from_cache: bool,
}

//--------------------------------------   Reactive triggers   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Ran,
    Skipped(Skipped),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub effect: EditEffect,
    pub triggers: Vec<(RecomputeTarget, TriggerOutcome)>,
}

impl EditOutcome {
    pub fn ran(&self, target: RecomputeTarget) -> bool {
        self.triggers.iter().any(|(t, o)| *t == target && *o == TriggerOutcome::Ran)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedMember {
    pub member: String,
    /// `(table, row)` for every row that was deleted, in deletion order.
    pub removed_rows: Vec<(String, usize)>,
}

//--------------------------------------       Auctions        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingResult {
    pub item: AuctionItem,
    pub warnings: Vec<LedgerWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStarted {
    pub session: SessionId,
    pub label: String,
    /// Individual lots, in auction order. Quantities above 1 have been expanded.
    pub lots: Vec<AuctionItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettleOutcome {
    /// Sold. The row stays in the working table until the next archival pass.
    PendingArchival,
    /// Sold and already moved to the archive table.
    Archived,
    /// No bids. The item goes back into the queue for the next session.
    Requeued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleResult {
    pub item: AuctionItem,
    pub outcome: SettleOutcome,
    pub warnings: Vec<LedgerWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidReceipt {
    pub item_id: ItemId,
    pub bidder: String,
    pub amount: Points,
    /// The leader this bid displaced, if any. Their locked points have been released.
    pub previous_leader: Option<String>,
    /// The bidder's remaining uncommitted points after this bid.
    pub available_after: Points,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveResult {
    /// The ids of the archived items, in the (descending row) order they were moved.
    pub archived: Vec<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosed {
    pub session: SessionId,
    pub label: String,
    /// The ledger column the session spend was written to. `None` if nothing was sold.
    pub column: Option<usize>,
    /// Total spend per bidder, as written to the ledger.
    pub spend: Vec<(String, Points)>,
    pub archived: usize,
    pub reconcile: Option<ReconcileResult>,
    pub warnings: Vec<LedgerWarning>,
}
