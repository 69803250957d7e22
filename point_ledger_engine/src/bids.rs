//! In-memory bid book for the lots of an open auction session.
//!
//! A member's leading bids lock their points. A new bid is only accepted if the bidder's ledger balance covers it on
//! top of everything they are already leading elsewhere. Raising your own leading bid only needs the increment.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ledger_common::Points;
use log::*;
use thiserror::Error;

use crate::db_types::{ItemId, MemberKey};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BidError {
    #[error("{0} is not open for bidding")]
    LotNotOpen(ItemId),
    #[error("{0} is already open")]
    LotAlreadyOpen(ItemId),
    #[error("The bid of {amount} is below the starting price of {start_price}")]
    BelowStartPrice { amount: Points, start_price: Points },
    #[error("The bid of {amount} does not beat the current bid of {leading}")]
    NotHigherThanLeader { amount: Points, leading: Points },
    #[error("{bidder} only has {available} available")]
    InsufficientPoints { bidder: String, available: Points },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bid {
    pub bidder: String,
    pub key: MemberKey,
    pub amount: Points,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LotBook {
    pub start_price: Points,
    pub opened_at: DateTime<Utc>,
    pub bids: Vec<Bid>,
}

impl LotBook {
    pub fn leader(&self) -> Option<&Bid> {
        self.bids.last()
    }

    pub fn bids_by(&self, key: &MemberKey) -> u32 {
        let count = self.bids.iter().filter(|b| &b.key == key).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

/// The result of closing a lot that received at least one bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotResult {
    pub winner: String,
    pub key: MemberKey,
    pub amount: Points,
    /// How many bids the winner placed on the lot.
    pub bid_count: u32,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidPlaced {
    pub previous_leader: Option<String>,
    pub available_after: Points,
}

#[derive(Debug, Clone, Default)]
pub struct BidBook {
    lots: HashMap<ItemId, LotBook>,
    locked: HashMap<MemberKey, Points>,
}

impl BidBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_lot(&mut self, id: &ItemId, start_price: Points) -> Result<(), BidError> {
        if self.lots.contains_key(id) {
            return Err(BidError::LotAlreadyOpen(id.clone()));
        }
        self.lots.insert(id.clone(), LotBook { start_price, opened_at: Utc::now(), bids: Vec::new() });
        Ok(())
    }

    pub fn lot(&self, id: &ItemId) -> Option<&LotBook> {
        self.lots.get(id)
    }

    pub fn is_open(&self, id: &ItemId) -> bool {
        self.lots.contains_key(id)
    }

    pub fn open_lots(&self) -> impl Iterator<Item = &ItemId> {
        self.lots.keys()
    }

    /// Points currently committed by `key`'s leading bids, across all lots.
    pub fn locked(&self, key: &MemberKey) -> Points {
        self.locked.get(key).copied().unwrap_or_default()
    }

    /// What `key` could still commit on the lot `id`, given a ledger balance of `points_left`.
    pub fn available(&self, id: &ItemId, key: &MemberKey, points_left: Points) -> Points {
        let own_lead = self
            .lots
            .get(id)
            .and_then(LotBook::leader)
            .filter(|b| &b.key == key)
            .map(|b| b.amount)
            .unwrap_or_default();
        points_left - (self.locked(key) - own_lead)
    }

    pub fn place(
        &mut self,
        id: &ItemId,
        bidder: &str,
        key: &MemberKey,
        amount: Points,
        points_left: Points,
    ) -> Result<BidPlaced, BidError> {
        let available = self.available(id, key, points_left);
        let lot = self.lots.get(id).ok_or_else(|| BidError::LotNotOpen(id.clone()))?;
        match lot.leader() {
            None if amount < lot.start_price => {
                return Err(BidError::BelowStartPrice { amount, start_price: lot.start_price });
            },
            Some(leader) if amount <= leader.amount => {
                return Err(BidError::NotHigherThanLeader { amount, leading: leader.amount });
            },
            _ => {},
        }
        if amount > available {
            return Err(BidError::InsufficientPoints { bidder: bidder.to_string(), available });
        }
        let previous = lot.leader().cloned();
        if let Some(prev) = &previous {
            self.release(&prev.key, prev.amount);
        }
        *self.locked.entry(key.clone()).or_default() += amount;
        let bid = Bid { bidder: bidder.to_string(), key: key.clone(), amount, placed_at: Utc::now() };
        if let Some(lot) = self.lots.get_mut(id) {
            lot.bids.push(bid);
        }
        debug!("🔨 {bidder} leads {id} with {amount}");
        Ok(BidPlaced {
            previous_leader: previous.filter(|p| &p.key != key).map(|p| p.bidder),
            available_after: available - amount,
        })
    }

    /// What closing the lot right now would produce.
    pub fn result(&self, id: &ItemId) -> Option<LotResult> {
        let lot = self.lots.get(id)?;
        let leader = lot.leader()?;
        Some(LotResult {
            winner: leader.bidder.clone(),
            key: leader.key.clone(),
            amount: leader.amount,
            bid_count: lot.bids_by(&leader.key),
            opened_at: lot.opened_at,
        })
    }

    /// Removes the lot from the book. The winner's locked points are released, since from here on they are spend.
    pub fn close_lot(&mut self, id: &ItemId) -> Option<LotResult> {
        let result = self.result(id);
        self.lots.remove(id);
        if let Some(r) = &result {
            self.release(&r.key, r.amount);
        }
        result
    }

    fn release(&mut self, key: &MemberKey, amount: Points) {
        if let Some(locked) = self.locked.get_mut(key) {
            *locked = locked.saturating_sub(amount);
            if locked.is_zero() {
                self.locked.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn key(name: &str) -> MemberKey {
        MemberKey::from_display(name).unwrap()
    }

    fn book() -> (BidBook, ItemId, ItemId) {
        let mut book = BidBook::new();
        let (a, b) = (ItemId::from("a_1"), ItemId::from("a_2"));
        book.open_lot(&a, Points::from(10)).unwrap();
        book.open_lot(&b, Points::from(5)).unwrap();
        (book, a, b)
    }

    #[test]
    fn bids_must_beat_the_leader() {
        let (mut book, a, _) = book();
        let pts = Points::from(100);
        assert!(matches!(book.place(&a, "alice", &key("alice"), Points::from(9), pts), Err(BidError::BelowStartPrice { .. })));
        book.place(&a, "alice", &key("alice"), Points::from(10), pts).unwrap();
        let err = book.place(&a, "bob", &key("bob"), Points::from(10), pts).unwrap_err();
        assert!(matches!(err, BidError::NotHigherThanLeader { .. }));
        let placed = book.place(&a, "bob", &key("bob"), Points::from(11), pts).unwrap();
        assert_eq!(placed.previous_leader.as_deref(), Some("alice"));
        assert_eq!(book.locked(&key("alice")), Points::zero());
        assert_eq!(book.locked(&key("bob")), Points::from(11));
        assert!(matches!(book.place(&ItemId::from("nope"), "bob", &key("bob"), Points::from(1), pts), Err(BidError::LotNotOpen(_))));
    }

    #[test]
    fn leading_bids_lock_points_across_lots() {
        let (mut book, a, b) = book();
        let alice = key("alice");
        book.place(&a, "alice", &alice, Points::from(15), Points::from(20)).unwrap();
        let err = book.place(&b, "alice", &alice, Points::from(6), Points::from(20)).unwrap_err();
        assert_eq!(err, BidError::InsufficientPoints { bidder: "alice".into(), available: Points::from(5) });
        let placed = book.place(&b, "alice", &alice, Points::from(5), Points::from(20)).unwrap();
        assert_eq!(placed.available_after, Points::zero());
    }

    #[test]
    fn raising_your_own_bid_only_needs_the_increment() {
        let (mut book, a, _) = book();
        let alice = key("alice");
        book.place(&a, "alice", &alice, Points::from(15), Points::from(20)).unwrap();
        let placed = book.place(&a, "Alice", &alice, Points::from(20), Points::from(20)).unwrap();
        assert_eq!(placed.previous_leader, None);
        assert_eq!(book.locked(&alice), Points::from(20));
    }

    #[test]
    fn closing_a_lot_reports_the_winner() {
        let (mut book, a, b) = book();
        book.place(&a, "alice", &key("alice"), Points::from(10), Points::from(50)).unwrap();
        book.place(&a, "bob", &key("bob"), Points::from(12), Points::from(50)).unwrap();
        book.place(&a, "bob", &key("bob"), Points::from(14), Points::from(50)).unwrap();
        let result = book.close_lot(&a).unwrap();
        assert_eq!((result.winner.as_str(), result.amount, result.bid_count), ("bob", Points::from(14), 2));
        assert_eq!(book.locked(&key("bob")), Points::zero());
        assert!(book.close_lot(&b).is_none());
        assert!(!book.is_open(&b));
    }
}
