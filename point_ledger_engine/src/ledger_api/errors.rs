use std::fmt::Display;

use ledger_common::Points;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{db_types::ItemId, gate::GateError, traits::{DatastoreError, LockTimeout}};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Invalid input. {0}")]
    InvalidInput(String),
    #[error("{0}")]
    LockTimeout(#[from] LockTimeout),
    #[error("A column for {0} already exists")]
    DuplicateColumn(String),
    #[error("Datastore error. {0}")]
    DatastoreError(#[from] DatastoreError),
    #[error("The ledger could not be reconciled after {attempts} attempts. {last_error}")]
    ReconcileFailed { attempts: u32, last_error: DatastoreError },
    #[error("The auction item {0} does not exist")]
    ItemNotFound(ItemId),
    #[error("Illegal item state change. {0}")]
    IllegalStateChange(String),
    #[error("Bid rejected. {0}")]
    BidRejected(String),
    #[error("There is no open auction session")]
    NoOpenSession,
    #[error("Auction session {0} is still open")]
    SessionAlreadyOpen(String),
}

impl From<GateError> for LedgerError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::LockTimeout(t) => LedgerError::LockTimeout(t),
        }
    }
}

/// A condition that did not stop an operation, but that an operator needs to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerWarning {
    /// A bidder's spend could not be attributed to any ledger row.
    UnmappedSpend { bidder: String, amount: Points },
    /// A member has attendance credit but no ledger row.
    MemberNotInLedger { member: String, credit: Points },
    /// Several ledger rows normalize to the same member key.
    DuplicateLedgerRow { member: String, rows: Vec<usize> },
    /// A session spend cell is not a number. It was counted as 0.
    UnparseableSpend { member: String, session: String, value: String },
    /// Adding a session spend cell would overflow the member's total. The cell was counted as 0.
    SpendOverflow { member: String, session: String, value: String },
    /// A balance does not fit in a points value. It was capped.
    BalanceOverflow { member: String },
    /// A spawn column header could not be normalized.
    UnparseableSpawnTimestamp { table: String, col: usize, value: String },
    /// The label did not match anything in the catalog, so it was listed as a new item.
    CatalogNoMatch { label: String },
    /// The label was corrected to the catalog spelling.
    CatalogCorrected { from: String, to: String, similarity: u8 },
    /// The operation's own write succeeded, but the follow-up recomputation did not.
    RecomputeFailed { target: String, reason: String },
}

impl Display for LedgerWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerWarning::UnmappedSpend { bidder, amount } => {
                write!(f, "{bidder} spent {amount} but does not match any ledger row")
            },
            LedgerWarning::MemberNotInLedger { member, credit } => {
                write!(f, "{member} has {credit} of attendance credit but no ledger row")
            },
            LedgerWarning::DuplicateLedgerRow { member, rows } => {
                write!(f, "{member} appears in ledger rows {rows:?}")
            },
            LedgerWarning::UnparseableSpend { member, session, value } => {
                write!(f, "'{value}' in session {session} for {member} is not a number. Counted as 0")
            },
            LedgerWarning::SpendOverflow { member, session, value } => {
                write!(f, "'{value}' in session {session} for {member} overflows the spend total. Counted as 0")
            },
            LedgerWarning::BalanceOverflow { member } => write!(f, "The balance of {member} is out of range. It was capped"),
            LedgerWarning::UnparseableSpawnTimestamp { table, col, value } => {
                write!(f, "'{value}' in {table} column {col} is not a recognisable timestamp")
            },
            LedgerWarning::CatalogNoMatch { label } => write!(f, "{label} is a new item"),
            LedgerWarning::CatalogCorrected { from, to, similarity } => {
                write!(f, "'{from}' was corrected to '{to}' ({similarity}% similar)")
            },
            LedgerWarning::RecomputeFailed { target, reason } => {
                write!(f, "The {target} could not be recomputed. {reason}")
            },
        }
    }
}
