use chrono::{DateTime, Utc};
use ledger_common::Points;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{AuctionItem, MemberBalance, SessionId},
    ledger_api::{LedgerWarning, SettleOutcome},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReconciledEvent {
    pub reconciled_at: DateTime<Utc>,
    pub balances: Vec<MemberBalance>,
    pub warnings: Vec<LedgerWarning>,
}

impl LedgerReconciledEvent {
    pub fn new(balances: Vec<MemberBalance>, warnings: Vec<LedgerWarning>) -> Self {
        Self { reconciled_at: Utc::now(), balances, warnings }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSettledEvent {
    /// The label of the session the item was sold in, if one was open.
    pub session: Option<String>,
    pub item: AuctionItem,
    pub outcome: SettleOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosedEvent {
    pub session: SessionId,
    pub label: String,
    pub spend: Vec<(String, Points)>,
    /// Spend that could not be attributed to a ledger row.
    pub unmapped: Vec<LedgerWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    LedgerReconciled(LedgerReconciledEvent),
    ItemSettled(ItemSettledEvent),
    SessionClosed(SessionClosedEvent),
}
