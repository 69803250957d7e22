use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use ledger_common::Points;
use log::*;
use tokio::sync::Mutex;

use crate::{
    bids::BidBook,
    catalog::{Catalog, CatalogMatch},
    db_types::{cell_at, AuctionItem, Cell, ItemId, ItemSource, ItemStatus, MemberKey, NewAuctionItem, Row, SessionId},
    events::{ItemSettledEvent, SessionClosedEvent},
    gate::LockGuard,
    ledger_api::{
        errors::{LedgerError, LedgerWarning},
        ledger_api::LedgerApi,
        objects::{ArchiveResult, BidReceipt, ListingResult, SessionClosed, SessionStarted, SettleOutcome, SettleResult},
    },
    normalize::format_canonical,
    services::ProcessLock,
    sheets::{
        auction_log_row,
        header,
        item_cols,
        item_from_row,
        item_to_row,
        LedgerSheet,
        ARCHIVE_TABLE,
        AUCTION_LOG_HEADER,
        AUCTION_LOG_TABLE,
        ITEMS_HEADER,
        ITEMS_TABLE,
        LEDGER_HEADER,
        LEDGER_TABLE,
    },
    state::EngineState,
    traits::{CellRange, DatastoreError, LockService, TabularDatastore},
};

/// The session label written to the auction log for items settled outside a session.
const NO_SESSION_LABEL: &str = "(no session)";

/// One unit up for auction in a session. Items with a quantity above 1 are split into several lots.
#[derive(Debug, Clone)]
struct Lot {
    item: AuctionItem,
    /// The id of the working-table item the lot was split from. Equal to `item.id` for single lots.
    parent: ItemId,
    base_label: String,
    /// False for manual-queue items, which have no working-table row yet.
    row_backed: bool,
}

impl Lot {
    fn expand(item: AuctionItem, row_backed: bool) -> Vec<Lot> {
        let total = item.quantity.max(1);
        if total == 1 {
            let parent = item.id.clone();
            let base_label = item.label.clone();
            return vec![Lot { item: AuctionItem { quantity: 1, ..item }, parent, base_label, row_backed }];
        }
        (1..=total)
            .map(|n| Lot {
                item: AuctionItem {
                    id: ItemId(format!("{}#{n}", item.id.as_str())),
                    label: format!("{} [{n}/{total}]", item.label),
                    quantity: 1,
                    ..item.clone()
                },
                parent: item.id.clone(),
                base_label: item.label.clone(),
                row_backed,
            })
            .collect()
    }
}

#[derive(Debug)]
struct OpenSession {
    id: SessionId,
    lots: Vec<Lot>,
    book: BidBook,
    /// Settled spend, in settlement order.
    tally: Vec<(MemberKey, String, Points)>,
}

impl OpenSession {
    fn spent(&self, key: &MemberKey) -> Points {
        self.tally.iter().filter(|(k, _, _)| k == key).map(|(_, _, p)| *p).sum()
    }

    fn summary(&self) -> SessionStarted {
        SessionStarted { session: self.id, label: self.id.label(), lots: self.lots.iter().map(|l| l.item.clone()).collect() }
    }
}

#[derive(Debug, Default)]
struct AuctionState {
    manual_queue: Vec<AuctionItem>,
    session: Option<OpenSession>,
}

/// A sale to record against a lot.
#[derive(Debug, Clone)]
struct Sale {
    winner: String,
    key: MemberKey,
    amount: Points,
    bid_count: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// `AuctionApi` runs auction sessions: it lists items, opens lots for bidding, settles them and writes each
/// session's spend back to the ledger.
///
/// Sessions and bids are held in memory. Everything that touches the datastore takes the ledger lock first and the
/// session state second, in that order.
pub struct AuctionApi<B, L: LockService = ProcessLock> {
    ledger: LedgerApi<B, L>,
    state: Arc<Mutex<AuctionState>>,
}

impl<B: Clone, L: LockService> Clone for AuctionApi<B, L> {
    fn clone(&self) -> Self {
        Self { ledger: self.ledger.clone(), state: Arc::clone(&self.state) }
    }
}

impl<B, L: LockService> Debug for AuctionApi<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuctionApi")
    }
}

impl<B, L: LockService> AuctionApi<B, L> {
    pub fn new(ledger: LedgerApi<B, L>) -> Self {
        Self { ledger, state: Arc::new(Mutex::new(AuctionState::default())) }
    }

    pub fn ledger(&self) -> &LedgerApi<B, L> {
        &self.ledger
    }
}

fn now_canonical(tz: &FixedOffset) -> String {
    format_canonical(&Utc::now().with_timezone(tz).naive_local())
}

fn find_item(rows: &[Row], id: &ItemId) -> Option<(usize, AuctionItem)> {
    rows.iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, r)| item_from_row(r).map(|item| (i, item)))
        .find(|(_, item)| &item.id == id)
}

impl<B, L> AuctionApi<B, L>
where
    B: TabularDatastore,
    L: LockService,
{
    //----------------------------------------    Catalog    ------------------------------------------------------

    /// The catalog of every item that has been auctioned so far, from the archive and the working table.
    pub async fn catalog(&self) -> Result<Catalog, LedgerError> {
        let db = self.ledger.db();
        let mut rows = Vec::new();
        for table in [ARCHIVE_TABLE, ITEMS_TABLE] {
            match db.read_table(table).await {
                Ok(table_rows) => rows.extend(table_rows.into_iter().skip(1)),
                Err(DatastoreError::TableNotFound(_)) => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Catalog::from_history(rows.iter()))
    }

    pub async fn match_catalog(&self, label: &str) -> Result<CatalogMatch, LedgerError> {
        let catalog = self.catalog().await?;
        Ok(catalog.find_best_match(label, self.ledger.config().fuzzy_threshold))
    }

    async fn prepare(&self, new: NewAuctionItem, source: ItemSource) -> Result<ListingResult, LedgerError> {
        if new.label.trim().is_empty() {
            return Err(LedgerError::InvalidInput("An item needs a label".into()));
        }
        if new.quantity == 0 || new.duration_minutes == 0 {
            return Err(LedgerError::InvalidInput("Quantity and duration must both be at least 1".into()));
        }
        if new.start_price.is_some_and(|p| p < Points::zero()) {
            return Err(LedgerError::InvalidInput("The start price cannot be negative".into()));
        }
        let matched = self.match_catalog(&new.label).await?;
        let mut warnings = Vec::new();
        if matched.is_fuzzy_match() {
            warnings.push(LedgerWarning::CatalogCorrected {
                from: new.label.trim().to_string(),
                to: matched.label().to_string(),
                similarity: (matched.similarity * 100.0).round().clamp(0.0, 100.0) as u8,
            });
        } else if !matched.is_match() {
            warnings.push(LedgerWarning::CatalogNoMatch { label: matched.label().to_string() });
        }
        let start_price = new.start_price.or(matched.suggested_price).ok_or_else(|| {
            LedgerError::InvalidInput(format!("{} is a new item, so it needs a start price", matched.label()))
        })?;
        let item = AuctionItem {
            id: ItemId::random(),
            label: matched.label().to_string(),
            start_price,
            duration_minutes: new.duration_minutes,
            quantity: new.quantity,
            source,
            boss: new.boss,
            status: ItemStatus::Queued,
            auction_start: None,
            auction_end: None,
        };
        Ok(ListingResult { item, warnings })
    }

    //----------------------------------------    Listing    ------------------------------------------------------

    /// Writes a queued item to the working table. The label is corrected against the catalog first.
    pub async fn list_item(&self, new: NewAuctionItem) -> Result<ListingResult, LedgerError> {
        let listing = self.prepare(new, ItemSource::Sheet).await?;
        let gate = self.ledger.gate();
        let _op = gate.begin_manual();
        let _guard = gate.lock().await?;
        self.ledger.read_table_or_create(ITEMS_TABLE, &ITEMS_HEADER).await?;
        let row = self.ledger.db().append_row(ITEMS_TABLE, item_to_row(&listing.item)).await?;
        info!("🔨 Listed {} {} at {} (row {row})", listing.item.id, listing.item.label, listing.item.start_price);
        Ok(listing)
    }

    /// Adds an item to the in-memory manual queue. It joins the next session that is started.
    pub async fn enqueue_manual(&self, new: NewAuctionItem) -> Result<ListingResult, LedgerError> {
        let listing = self.prepare(new, ItemSource::Queue).await?;
        self.state.lock().await.manual_queue.push(listing.item.clone());
        info!("🔨 Queued {} {} at {}", listing.item.id, listing.item.label, listing.item.start_price);
        Ok(listing)
    }

    pub async fn manual_queue(&self) -> Vec<AuctionItem> {
        self.state.lock().await.manual_queue.clone()
    }

    pub async fn remove_from_queue(&self, id: &ItemId) -> Result<AuctionItem, LedgerError> {
        let mut state = self.state.lock().await;
        let pos = state.manual_queue.iter().position(|i| &i.id == id).ok_or_else(|| LedgerError::ItemNotFound(id.clone()))?;
        let item = state.manual_queue.remove(pos);
        debug!("🔨 Removed {id} from the manual queue");
        Ok(item)
    }

    /// Empties the manual queue. Returns the number of items removed.
    pub async fn clear_queue(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.manual_queue.len();
        state.manual_queue.clear();
        debug!("🔨 Cleared {count} items from the manual queue");
        count
    }

    //----------------------------------------    Sessions   ------------------------------------------------------

    pub async fn current_session(&self) -> Option<SessionStarted> {
        self.state.lock().await.session.as_ref().map(OpenSession::summary)
    }

    /// Starts a session for today, in the configured time zone.
    pub async fn start_session(&self) -> Result<SessionStarted, LedgerError> {
        let day = Utc::now().with_timezone(&self.ledger.config().timezone).date_naive();
        self.start_session_on(day).await
    }

    /// Starts a session on `day`. Every queued working-table item and the whole manual queue join it.
    pub async fn start_session_on(&self, day: NaiveDate) -> Result<SessionStarted, LedgerError> {
        let gate = self.ledger.gate();
        let _op = gate.begin_manual();
        let guard = gate.lock().await?;
        let mut state = self.state.lock().await;
        if let Some(session) = &state.session {
            return Err(LedgerError::SessionAlreadyOpen(session.id.label()));
        }
        let rows = self.backfill_item_ids(&guard).await?;
        let mut lots = rows
            .iter()
            .skip(1)
            .filter_map(|r| item_from_row(r))
            .filter(|item| matches!(item.status, ItemStatus::Queued | ItemStatus::Open))
            .flat_map(|item| Lot::expand(item, true))
            .collect::<Vec<_>>();
        lots.extend(state.manual_queue.iter().cloned().flat_map(|item| Lot::expand(item, false)));
        if lots.is_empty() {
            return Err(LedgerError::InvalidInput("There is nothing queued for auction".into()));
        }
        let db = self.ledger.db();
        let mut engine_state = EngineState::load(db).await?;
        let id = engine_state.next_session(day);
        engine_state.save(db).await?;
        state.manual_queue.clear();
        let session = OpenSession { id, lots, book: BidBook::new(), tally: Vec::new() };
        let summary = session.summary();
        info!("🔨 Auction session {} started with {} lots", summary.label, summary.lots.len());
        state.session = Some(session);
        Ok(summary)
    }

    /// Gives every working-table item that an editor added without an id a fresh one.
    async fn backfill_item_ids(&self, _guard: &LockGuard<'_, L>) -> Result<Vec<Row>, LedgerError> {
        let db = self.ledger.db();
        let mut rows = self.ledger.read_table_or_create(ITEMS_TABLE, &ITEMS_HEADER).await?;
        for (i, row) in rows.iter_mut().enumerate().skip(1) {
            let needs_id = item_from_row(row).is_some_and(|item| item.id.as_str().is_empty());
            if needs_id {
                let id = ItemId::random();
                db.write_range(ITEMS_TABLE, i, item_cols::ID, vec![vec![Cell::from(id.as_str())]]).await?;
                row[item_cols::ID] = Cell::from(id.as_str());
                debug!("🔨 Assigned {id} to the item in row {i}");
            }
        }
        Ok(rows)
    }

    /// Opens bidding on a lot of the current session.
    pub async fn open_item(&self, id: &ItemId) -> Result<AuctionItem, LedgerError> {
        let tz = self.ledger.config().timezone;
        let mut state = self.state.lock().await;
        let session = state.session.as_mut().ok_or(LedgerError::NoOpenSession)?;
        let lot = session.lots.iter_mut().find(|l| &l.item.id == id).ok_or_else(|| LedgerError::ItemNotFound(id.clone()))?;
        if lot.item.status != ItemStatus::Queued {
            return Err(LedgerError::IllegalStateChange(format!("{id} is {} and cannot be opened", lot.item.status)));
        }
        session.book.open_lot(id, lot.item.start_price).map_err(|e| LedgerError::IllegalStateChange(e.to_string()))?;
        lot.item.status = ItemStatus::Open;
        lot.item.auction_start = Some(now_canonical(&tz));
        info!("🔨 Bidding is open on {id} {}", lot.item.label);
        Ok(lot.item.clone())
    }

    /// Places a bid on an open lot. The bidder's ledger balance, less their leading bids on other lots and what they
    /// have already won this session, must cover the amount.
    pub async fn place_bid(&self, id: &ItemId, bidder: &str, amount: Points) -> Result<BidReceipt, LedgerError> {
        let key = MemberKey::from_display(bidder)
            .ok_or_else(|| LedgerError::InvalidInput(format!("'{bidder}' is not a usable member name")))?;
        if !amount.is_positive() {
            return Err(LedgerError::BidRejected("Bids must be positive".into()));
        }
        let view = self.ledger.get_ledger(false).await?;
        let points_left = view
            .snapshot
            .points_left(&key)
            .ok_or_else(|| LedgerError::BidRejected(format!("{bidder} is not in the ledger")))?;
        let mut state = self.state.lock().await;
        let session = state.session.as_mut().ok_or(LedgerError::NoOpenSession)?;
        let uncommitted = points_left - session.spent(&key);
        let bidder = bidder.trim();
        let placed =
            session.book.place(id, bidder, &key, amount, uncommitted).map_err(|e| LedgerError::BidRejected(e.to_string()))?;
        Ok(BidReceipt {
            item_id: id.clone(),
            bidder: bidder.to_string(),
            amount,
            previous_leader: placed.previous_leader,
            available_after: placed.available_after,
        })
    }

    //----------------------------------------   Settlement  ------------------------------------------------------

    /// Records the result of an auction for an item. `winner = None` means nobody bid, and the item is requeued.
    ///
    /// A sale needs an open session, since its spend is written to the ledger when the session closes.
    pub async fn settle_item(
        &self,
        id: &ItemId,
        winner: Option<&str>,
        amount: Points,
        bid_count: u32,
    ) -> Result<SettleResult, LedgerError> {
        let sale = match winner {
            Some(name) => {
                let key = MemberKey::from_display(name)
                    .ok_or_else(|| LedgerError::InvalidInput(format!("'{name}' is not a usable member name")))?;
                if amount < Points::zero() {
                    return Err(LedgerError::InvalidInput("A winning bid cannot be negative".into()));
                }
                Some(Sale { winner: name.trim().to_string(), key, amount, bid_count, opened_at: None })
            },
            None => None,
        };
        let gate = self.ledger.gate();
        let _op = gate.begin_manual();
        let guard = gate.lock().await?;
        let mut state = self.state.lock().await;
        self.settle_locked(&guard, &mut state, id, sale).await
    }

    /// Settles an open lot from the state of its bids.
    pub async fn settle_open_item(&self, id: &ItemId) -> Result<SettleResult, LedgerError> {
        let gate = self.ledger.gate();
        let _op = gate.begin_manual();
        let guard = gate.lock().await?;
        let mut state = self.state.lock().await;
        let session = state.session.as_ref().ok_or(LedgerError::NoOpenSession)?;
        if !session.book.is_open(id) {
            return Err(LedgerError::IllegalStateChange(format!("{id} is not open for bidding")));
        }
        let sale = session.book.result(id).map(|r| Sale {
            winner: r.winner,
            key: r.key,
            amount: r.amount,
            bid_count: r.bid_count,
            opened_at: Some(r.opened_at),
        });
        self.settle_locked(&guard, &mut state, id, sale).await
    }

    async fn settle_locked(
        &self,
        guard: &LockGuard<'_, L>,
        state: &mut AuctionState,
        id: &ItemId,
        sale: Option<Sale>,
    ) -> Result<SettleResult, LedgerError> {
        let db = self.ledger.db();
        let config = self.ledger.config();
        let rows = self.ledger.read_table_or_create(ITEMS_TABLE, &ITEMS_HEADER).await?;
        let session_label = state.session.as_ref().map(|s| s.id.label());
        let in_session = state.session.as_ref().and_then(|s| s.lots.iter().find(|l| &l.item.id == id)).cloned();
        let lot = match in_session {
            Some(lot) => lot,
            None => {
                let (_, item) = find_item(&rows, id).ok_or_else(|| LedgerError::ItemNotFound(id.clone()))?;
                if !matches!(item.status, ItemStatus::Queued | ItemStatus::Open) {
                    return Err(LedgerError::IllegalStateChange(format!("{id} is already {}", item.status)));
                }
                Lot { parent: item.id.clone(), base_label: item.label.clone(), item, row_backed: true }
            },
        };
        let source_row = if lot.row_backed {
            Some(find_item(&rows, &lot.parent).ok_or_else(|| LedgerError::ItemNotFound(lot.parent.clone()))?)
        } else {
            None
        };
        let now = now_canonical(&config.timezone);
        let mut warnings = Vec::new();

        let Some(sale) = sale else {
            let item = AuctionItem {
                label: lot.base_label.clone(),
                status: ItemStatus::Queued,
                auction_start: None,
                auction_end: None,
                ..lot.item.clone()
            };
            if !lot.row_backed {
                db.append_row(ITEMS_TABLE, item_to_row(&item)).await?;
            }
            self.drop_lot(state, id);
            info!("🔨 {id} {} had no bids and goes back in the queue", lot.item.label);
            let result = SettleResult { item, outcome: SettleOutcome::Requeued, warnings };
            self.publish_settled(session_label, &result).await;
            return Ok(result);
        };

        if state.session.is_none() {
            return Err(LedgerError::NoOpenSession);
        }
        let status =
            ItemStatus::Settled { winner: sale.winner.clone(), winning_bid: sale.amount, bid_count: sale.bid_count };
        let auction_start = lot
            .item
            .auction_start
            .clone()
            .or_else(|| sale.opened_at.map(|t| format_canonical(&t.with_timezone(&config.timezone).naive_local())))
            .or_else(|| Some(now.clone()));
        let settled = match source_row {
            Some((row, row_item)) if row_item.quantity <= 1 => {
                let settled = AuctionItem {
                    status,
                    auction_start,
                    auction_end: Some(now.clone()),
                    quantity: 1,
                    ..row_item
                };
                db.write_range(ITEMS_TABLE, row, 0, vec![item_to_row(&settled)]).await?;
                settled
            },
            Some((row, row_item)) => {
                let remaining = row_item.quantity - 1;
                let settled = AuctionItem {
                    id: lot.item.id.clone(),
                    status,
                    auction_start,
                    auction_end: Some(now.clone()),
                    quantity: 1,
                    ..row_item
                };
                db.append_row(ITEMS_TABLE, item_to_row(&settled)).await?;
                db.write_range(ITEMS_TABLE, row, item_cols::QUANTITY, vec![vec![Cell::Int(i64::from(remaining))]]).await?;
                settled
            },
            None => {
                let settled = AuctionItem {
                    label: lot.base_label.clone(),
                    status,
                    auction_start,
                    auction_end: Some(now.clone()),
                    quantity: 1,
                    ..lot.item.clone()
                };
                db.append_row(ITEMS_TABLE, item_to_row(&settled)).await?;
                settled
            },
        };
        let logged = AuctionItem { label: lot.item.label.clone(), ..settled.clone() };
        if let Some(row) = auction_log_row(session_label.as_deref().unwrap_or(NO_SESSION_LABEL), &logged, &now) {
            self.ledger.read_table_or_create(AUCTION_LOG_TABLE, &AUCTION_LOG_HEADER).await?;
            db.append_row(AUCTION_LOG_TABLE, row).await?;
        }
        if let Some(session) = state.session.as_mut() {
            session.tally.push((sale.key.clone(), sale.winner.clone(), sale.amount));
        }
        self.drop_lot(state, id);
        self.ledger.cache().invalidate();
        info!("🔨 {id} {} sold to {} for {}", lot.item.label, sale.winner, sale.amount);

        let mut item = settled;
        let mut outcome = SettleOutcome::PendingArchival;
        if config.archive_on_settle {
            let settled_id = item.id.clone();
            match self.archive_locked(guard, |i| i.id == settled_id).await {
                Ok(archived) if archived.contains(&settled_id) => {
                    outcome = SettleOutcome::Archived;
                    item.status = ItemStatus::Archived;
                },
                Ok(_) => warn!("🔨 {settled_id} was sold but could not be found again to archive it"),
                Err(e) => {
                    warn!("🔨 {settled_id} was sold but could not be archived. {e}");
                    warnings.push(LedgerWarning::RecomputeFailed { target: "archive".into(), reason: e.to_string() });
                },
            }
        }
        let result = SettleResult { item, outcome, warnings };
        self.publish_settled(session_label, &result).await;
        Ok(result)
    }

    fn drop_lot(&self, state: &mut AuctionState, id: &ItemId) {
        if let Some(session) = state.session.as_mut() {
            session.book.close_lot(id);
            session.lots.retain(|l| &l.item.id != id);
        }
    }

    async fn publish_settled(&self, session: Option<String>, result: &SettleResult) {
        for emitter in &self.ledger.producers().item_settled_producer {
            debug!("📬️ Notifying item settled hook subscribers");
            let event = ItemSettledEvent { session: session.clone(), item: result.item.clone(), outcome: result.outcome };
            emitter.publish_event(event).await;
        }
    }

    //----------------------------------------    Archival   ------------------------------------------------------

    /// Moves every sold item from the working table to the archive.
    pub async fn archive_settled(&self) -> Result<ArchiveResult, LedgerError> {
        let gate = self.ledger.gate();
        let _op = gate.begin_manual();
        let guard = gate.lock().await?;
        let archived = self.archive_locked(&guard, |_| true).await?;
        Ok(ArchiveResult { archived })
    }

    /// Copies the matching sold rows verbatim to the archive, then deletes them, working from the highest row index
    /// down so that earlier indices stay valid. Each row is checked against the snapshot before it is deleted.
    async fn archive_locked<F>(&self, _guard: &LockGuard<'_, L>, filter: F) -> Result<Vec<ItemId>, LedgerError>
    where F: Fn(&AuctionItem) -> bool {
        let db = self.ledger.db();
        let rows = match db.read_table(ITEMS_TABLE).await {
            Ok(rows) => rows,
            Err(DatastoreError::TableNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let candidates = rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, r)| item_from_row(r).map(|item| (i, r, item)))
            .filter(|(_, _, item)| item.status.has_winner() && filter(item))
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        self.ledger.read_table_or_create(ARCHIVE_TABLE, &ITEMS_HEADER).await?;
        let mut archived = Vec::with_capacity(candidates.len());
        for (i, row, item) in candidates.into_iter().rev() {
            let current = db.read_range(ITEMS_TABLE, CellRange::new(i, item_cols::ID, 1, 2)).await?;
            let current = current.first().map(Vec::as_slice).unwrap_or_default();
            if cell_at(current, 0) != cell_at(row, item_cols::ID) || cell_at(current, 1) != cell_at(row, item_cols::ITEM) {
                warn!("🔨 Row {i} of {ITEMS_TABLE} changed during archival. Stopping after {} items", archived.len());
                break;
            }
            db.append_row(ARCHIVE_TABLE, row.clone()).await?;
            db.delete_row(ITEMS_TABLE, i).await?;
            debug!("🔨 Archived {} {} from row {i}", item.id, item.label);
            archived.push(item.id);
        }
        info!("🔨 Archived {} sold items", archived.len());
        Ok(archived)
    }

    //----------------------------------------    Closing    ------------------------------------------------------

    /// Closes the current session.
    ///
    /// Open lots are settled from their bids and lots that never opened are requeued. The session's spend is then
    /// written to a new ledger column, sold items are archived and the ledger is reconciled.
    pub async fn close_session(&self) -> Result<SessionClosed, LedgerError> {
        let gate = self.ledger.gate();
        let _op = gate.begin_manual();
        let guard = gate.lock().await?;
        let mut state = self.state.lock().await;
        let session = state.session.as_ref().ok_or(LedgerError::NoOpenSession)?;
        let session_id = session.id;
        let label = session_id.label();
        let db = self.ledger.db();
        let ledger_rows = self.ledger.read_table_or_create(LEDGER_TABLE, &LEDGER_HEADER).await?;
        let sheet = LedgerSheet::parse(&ledger_rows);
        if sheet.has_session(&label) {
            return Err(LedgerError::DuplicateColumn(label));
        }

        let pending = session.lots.iter().map(|l| (l.item.id.clone(), session.book.result(&l.item.id))).collect::<Vec<_>>();
        for (id, result) in pending {
            let sale = result.map(|r| Sale {
                winner: r.winner,
                key: r.key,
                amount: r.amount,
                bid_count: r.bid_count,
                opened_at: Some(r.opened_at),
            });
            self.settle_locked(&guard, &mut state, &id, sale).await?;
        }

        let tally = state.session.as_ref().map(|s| s.tally.clone()).unwrap_or_default();
        let mut spend: Vec<(MemberKey, String, Points)> = Vec::new();
        for (key, bidder, amount) in tally {
            match spend.iter_mut().find(|(k, _, _)| *k == key) {
                Some(entry) => entry.2 = entry.2.saturating_add(amount),
                None => spend.push((key, bidder, amount)),
            }
        }
        let mut warnings = Vec::new();
        for (key, bidder, amount) in &spend {
            if sheet.find(key).is_none() {
                warn!("🔨 {bidder} spent {amount} in {label} but has no ledger row");
                warnings.push(LedgerWarning::UnmappedSpend { bidder: bidder.clone(), amount: *amount });
            }
        }
        let column = if spend.is_empty() {
            info!("🔨 Nothing was sold in {label}. No ledger column is written");
            None
        } else {
            let column = sheet.next_column();
            let mut credited = Vec::new();
            let values = (1..sheet.row_count)
                .map(|row| match sheet.entries.iter().find(|e| e.row == row) {
                    Some(entry) if !credited.contains(&entry.key) => {
                        credited.push(entry.key.clone());
                        let amount = spend.iter().find(|(k, _, _)| *k == entry.key).map(|s| s.2).unwrap_or_default();
                        vec![Cell::from(amount)]
                    },
                    Some(_) => vec![Cell::from(Points::zero())],
                    None => vec![Cell::Empty],
                })
                .collect::<Vec<Row>>();
            if !values.is_empty() {
                db.write_range(LEDGER_TABLE, 1, column, values).await?;
            }
            // The header goes last, so a failed write leaves no labelled column behind
            db.write_range(LEDGER_TABLE, 0, column, vec![vec![Cell::from(label.as_str())]]).await?;
            self.ledger.cache().invalidate();
            info!("🔨 Wrote the spend of {label} to ledger column {column}");
            Some(column)
        };

        let archived = self.archive_locked(&guard, |_| true).await?;
        let reconcile = self.ledger.recompute_after_write(&guard, &mut warnings).await;
        state.session = None;
        drop(state);
        drop(guard);
        if let Some(result) = &reconcile {
            self.ledger.publish_reconciled(result).await;
        }
        let spend = spend.into_iter().map(|(_, bidder, amount)| (bidder, amount)).collect::<Vec<_>>();
        let unmapped: Vec<LedgerWarning> =
            warnings.iter().filter(|w| matches!(w, LedgerWarning::UnmappedSpend { .. })).cloned().collect();
        for emitter in &self.ledger.producers().session_closed_producer {
            debug!("📬️ Notifying session closed hook subscribers");
            let event = SessionClosedEvent {
                session: session_id,
                label: label.clone(),
                spend: spend.clone(),
                unmapped: unmapped.clone(),
            };
            emitter.publish_event(event).await;
        }
        info!("🔨 Auction session {label} closed");
        Ok(SessionClosed { session: session_id, label, column, spend, archived: archived.len(), reconcile, warnings })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        boss_registry::BossRegistry,
        config::EngineConfig,
        events::EventProducers,
        memory::MemoryDatastore,
        sheets::TOTALS_TABLE,
    };

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 5).unwrap()
    }

    async fn seeded(config: EngineConfig) -> AuctionApi<MemoryDatastore> {
        let db = MemoryDatastore::new();
        db.seed_table(LEDGER_TABLE, vec![header(&LEDGER_HEADER), vec![Cell::from("Alice")], vec![Cell::from("Bob")]])
            .await
            .unwrap();
        db.seed_table("ATTENDANCE_WEEK_20251005", vec![
            vec![Cell::Empty, Cell::from("10/05/25 09:00")],
            vec![Cell::Empty, Cell::from("Venatus")],
            vec![Cell::from("Alice"), Cell::Bool(true)],
            vec![Cell::from("Bob"), Cell::Bool(true)],
        ])
        .await
        .unwrap();
        let mut archive = vec![header(&ITEMS_HEADER)];
        let mut blue_ring = vec![Cell::Empty; ITEMS_HEADER.len()];
        blue_ring[item_cols::ID] = Cell::from("a_1_1000");
        blue_ring[item_cols::ITEM] = Cell::from("Blue Ring");
        blue_ring[item_cols::START_PRICE] = Cell::Int(5);
        blue_ring[item_cols::WINNER] = Cell::from("Bob");
        archive.push(blue_ring);
        db.seed_table(ARCHIVE_TABLE, archive).await.unwrap();
        let config = config.with_bosses(BossRegistry::default().with_boss("Venatus", Points::from(20), &[]));
        let ledger = LedgerApi::new(db, config, EventProducers::default());
        ledger.reconcile_ledger().await.unwrap();
        AuctionApi::new(ledger)
    }

    fn key(name: &str) -> MemberKey {
        MemberKey::from_display(name).unwrap()
    }

    #[tokio::test]
    async fn listings_are_corrected_against_the_catalog() {
        let api = seeded(EngineConfig::default()).await;
        let listing = api.list_item(NewAuctionItem::new("Blue Rign")).await.unwrap();
        assert_eq!(listing.item.label, "Blue Ring");
        assert_eq!(listing.item.start_price, Points::from(5));
        assert!(matches!(&listing.warnings[..], [LedgerWarning::CatalogCorrected { similarity: 78, .. }]));
        let err = api.list_item(NewAuctionItem::new("Golden Helmet")).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        let listing =
            api.enqueue_manual(NewAuctionItem::new("Golden Helmet").with_start_price(Points::from(9))).await.unwrap();
        assert_eq!(listing.warnings, vec![LedgerWarning::CatalogNoMatch { label: "Golden Helmet".into() }]);
        assert_eq!(listing.item.source, ItemSource::Queue);
        let rows = api.ledger().db().read_table(ITEMS_TABLE).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn manual_queue_management() {
        let api = seeded(EngineConfig::default()).await;
        let a = api.enqueue_manual(NewAuctionItem::new("Red Hat").with_start_price(Points::from(3))).await.unwrap();
        api.enqueue_manual(NewAuctionItem::new("Green Hat").with_start_price(Points::from(3))).await.unwrap();
        assert_eq!(api.remove_from_queue(&a.item.id).await.unwrap().label, "Red Hat");
        assert!(matches!(api.remove_from_queue(&a.item.id).await, Err(LedgerError::ItemNotFound(_))));
        assert_eq!(api.clear_queue().await, 1);
        assert!(api.manual_queue().await.is_empty());
        assert!(matches!(api.start_session_on(day()).await, Err(LedgerError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn a_full_session() {
        let api = seeded(EngineConfig::default()).await;
        let ring = api.list_item(NewAuctionItem::new("Blue Ring").with_quantity(2)).await.unwrap().item;
        let hat = api.enqueue_manual(NewAuctionItem::new("Red Hat").with_start_price(Points::from(3))).await.unwrap().item;
        let started = api.start_session_on(day()).await.unwrap();
        assert_eq!(started.label, "10/05/25 #1");
        let labels = started.lots.iter().map(|l| l.label.as_str()).collect::<Vec<_>>();
        assert_eq!(labels, vec!["Blue Ring [1/2]", "Blue Ring [2/2]", "Red Hat"]);
        assert!(matches!(api.start_session_on(day()).await, Err(LedgerError::SessionAlreadyOpen(_))));
        let (lot1, lot2) = (started.lots[0].id.clone(), started.lots[1].id.clone());

        api.open_item(&lot1).await.unwrap();
        api.place_bid(&lot1, "Alice", Points::from(5)).await.unwrap();
        let receipt = api.place_bid(&lot1, "Bob", Points::from(6)).await.unwrap();
        assert_eq!(receipt.previous_leader.as_deref(), Some("Alice"));
        api.place_bid(&lot1, "alice", Points::from(8)).await.unwrap();
        assert!(matches!(api.place_bid(&lot1, "Zed", Points::from(9)).await, Err(LedgerError::BidRejected(_))));
        let sold = api.settle_open_item(&lot1).await.unwrap();
        assert_eq!(sold.outcome, SettleOutcome::PendingArchival);
        assert_eq!(sold.item.status, ItemStatus::Settled {
            winner: "alice".into(),
            winning_bid: Points::from(8),
            bid_count: 2
        });

        api.open_item(&hat.id).await.unwrap();
        let unsold = api.settle_open_item(&hat.id).await.unwrap();
        assert_eq!(unsold.outcome, SettleOutcome::Requeued);

        // Alice has 20 points, 8 of which she already spent this session
        api.open_item(&lot2).await.unwrap();
        assert!(matches!(api.place_bid(&lot2, "Alice", Points::from(13)).await, Err(LedgerError::BidRejected(_))));
        let receipt = api.place_bid(&lot2, "Alice", Points::from(12)).await.unwrap();
        assert_eq!(receipt.available_after, Points::zero());

        let closed = api.close_session().await.unwrap();
        assert_eq!(closed.column, Some(3));
        assert_eq!(closed.spend, vec![("alice".to_string(), Points::from(20))]);
        assert_eq!(closed.archived, 2);
        assert!(closed.warnings.is_empty());
        let alice = closed.reconcile.as_ref().and_then(|r| r.balance(&key("alice"))).unwrap();
        assert_eq!((alice.points_left, alice.points_consumed), (Points::zero(), Points::from(20)));

        let db = api.ledger().db();
        let ledger = db.read_table(LEDGER_TABLE).await.unwrap();
        assert_eq!(ledger[0][3], Cell::from("10/05/25 #1"));
        assert_eq!(ledger[2][3], Cell::Int(0));
        let items = db.read_table(ITEMS_TABLE).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(item_from_row(&items[1]).unwrap().label, "Red Hat");
        let archive = db.read_table(ARCHIVE_TABLE).await.unwrap();
        let archived_ids = archive.iter().skip(2).map(|r| cell_at(r, item_cols::ID).as_text()).collect::<Vec<_>>();
        assert_eq!(archived_ids, vec![format!("{}#1", ring.id.as_str()), ring.id.as_str().to_string()]);
        assert_eq!(db.read_table(AUCTION_LOG_TABLE).await.unwrap().len(), 3);
        assert!(db.read_table(TOTALS_TABLE).await.is_ok());
        assert!(api.current_session().await.is_none());

        let next = api.start_session_on(day()).await.unwrap();
        assert_eq!(next.label, "10/05/25 #2");
        assert_eq!(next.lots.len(), 1);
        assert_eq!(next.lots[0].label, "Red Hat");
    }

    #[tokio::test]
    async fn unmapped_bidders_and_duplicate_labels() {
        let api = seeded(EngineConfig::default()).await;
        let hat = api.list_item(NewAuctionItem::new("Red Hat").with_start_price(Points::from(3))).await.unwrap().item;
        api.start_session_on(day()).await.unwrap();
        assert!(matches!(
            api.settle_item(&hat.id, Some("  "), Points::from(4), 1).await,
            Err(LedgerError::InvalidInput(_))
        ));
        api.settle_item(&hat.id, Some("Zed"), Points::from(4), 1).await.unwrap();
        assert!(matches!(
            api.settle_item(&hat.id, Some("Zed"), Points::from(4), 1).await,
            Err(LedgerError::IllegalStateChange(_))
        ));
        let closed = api.close_session().await.unwrap();
        assert_eq!(closed.warnings, vec![LedgerWarning::UnmappedSpend { bidder: "Zed".into(), amount: Points::from(4) }]);

        // A second session whose label already exists in the ledger is refused before anything is written
        let db = api.ledger().db();
        db.write_range(LEDGER_TABLE, 0, 4, vec![vec![Cell::from("10/05/25 #2")]]).await.unwrap();
        let hat = api.list_item(NewAuctionItem::new("Red Hat")).await.unwrap().item;
        api.start_session_on(day()).await.unwrap();
        api.settle_item(&hat.id, Some("Bob"), Points::from(3), 1).await.unwrap();
        let before = db.read_table(LEDGER_TABLE).await.unwrap();
        assert!(matches!(api.close_session().await, Err(LedgerError::DuplicateColumn(_))));
        assert_eq!(db.read_table(LEDGER_TABLE).await.unwrap(), before);
        assert!(api.current_session().await.is_some());
    }

    #[tokio::test]
    async fn archive_on_settle() {
        let api = seeded(EngineConfig::default().with_archive_on_settle(true)).await;
        let hat = api.list_item(NewAuctionItem::new("Red Hat").with_start_price(Points::from(3))).await.unwrap().item;
        api.start_session_on(day()).await.unwrap();
        let result = api.settle_item(&hat.id, Some("Bob"), Points::from(3), 1).await.unwrap();
        assert_eq!(result.outcome, SettleOutcome::Archived);
        assert_eq!(api.ledger().db().read_table(ITEMS_TABLE).await.unwrap().len(), 1);
        assert_eq!(api.ledger().db().read_table(ARCHIVE_TABLE).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn archival_moves_sold_rows_high_to_low() {
        let api = seeded(EngineConfig::default()).await;
        let row = |id: &str, winner: &str| {
            let mut r = vec![Cell::Empty; ITEMS_HEADER.len()];
            r[item_cols::ID] = Cell::from(id);
            r[item_cols::ITEM] = Cell::from(format!("Item {id}"));
            r[item_cols::WINNER] = Cell::from(winner);
            r
        };
        let rows = vec![header(&ITEMS_HEADER), row("i1", ""), row("i2", "alice"), row("i3", ""), row("i4", "bob")];
        api.ledger().db().seed_table(ITEMS_TABLE, rows.clone()).await.unwrap();
        let result = api.archive_settled().await.unwrap();
        assert_eq!(result.archived, vec![ItemId::from("i4"), ItemId::from("i2")]);
        let remaining = api.ledger().db().read_table(ITEMS_TABLE).await.unwrap();
        assert_eq!(remaining, vec![rows[0].clone(), rows[1].clone(), rows[3].clone()]);
        let archive = api.ledger().db().read_table(ARCHIVE_TABLE).await.unwrap();
        assert_eq!(archive[2..], [rows[4].clone(), rows[2].clone()]);
        assert!(api.archive_settled().await.unwrap().archived.is_empty());
    }
}
