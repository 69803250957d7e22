use std::{fmt::Display, str::FromStr};

use chrono::NaiveDate;
use ledger_common::{parse_boolean_flag, Points};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::normalize_identity;

//--------------------------------------         Cell          ---------------------------------------------------------
/// The value held in one addressable cell of a table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Int(i64),
    Bool(bool),
}

pub type Row = Vec<Cell>;

impl Cell {
    pub fn text<S: Into<String>>(s: S) -> Self {
        Self::Text(s.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// The cell as display text. Empty cells give an empty string.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Int(i) => i.to_string(),
            Cell::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        }
    }

    /// Interprets the cell as a checkbox. Editors sometimes paste `TRUE`/`x` text instead of ticking the box.
    pub fn is_checked(&self) -> bool {
        match self {
            Cell::Bool(b) => *b,
            Cell::Int(i) => *i != 0,
            Cell::Text(s) => parse_boolean_flag(Some(s.clone()), false),
            Cell::Empty => false,
        }
    }

    /// Interprets the cell as an amount of points. Empty cells are `Ok(None)`; text that is not a number is an error.
    pub fn as_points(&self) -> Result<Option<Points>, CellConversionError> {
        match self {
            Cell::Empty => Ok(None),
            Cell::Int(i) => Ok(Some(Points::from(*i))),
            Cell::Text(s) if s.trim().is_empty() => Ok(None),
            Cell::Text(s) => s.parse::<Points>().map(Some).map_err(|e| CellConversionError(e.to_string())),
            Cell::Bool(_) => Err(CellConversionError("a checkbox is not an amount".into())),
        }
    }
}

impl From<Points> for Cell {
    fn from(value: Points) -> Self {
        Cell::Int(value.value())
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<Option<Points>> for Cell {
    fn from(value: Option<Points>) -> Self {
        value.map(Cell::from).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid cell value: {0}")]
pub struct CellConversionError(String);

/// Returns the cell at `col`, or an empty cell if the row is shorter.
pub fn cell_at(row: &[Cell], col: usize) -> &Cell {
    const EMPTY: Cell = Cell::Empty;
    row.get(col).unwrap_or(&EMPTY)
}

/// Sets the cell at `(row, col)`, growing the ragged row set as needed.
pub fn put_cell(rows: &mut Vec<Row>, row: usize, col: usize, value: Cell) {
    if rows.len() <= row {
        rows.resize_with(row + 1, Vec::new);
    }
    let r = &mut rows[row];
    if r.len() <= col {
        r.resize(col + 1, Cell::Empty);
    }
    r[col] = value;
}

//--------------------------------------       MemberKey       ---------------------------------------------------------
/// The normalized identity of a member. Every cross-table member lookup goes through this key,
/// never through the raw display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberKey(String);

impl MemberKey {
    /// Returns `None` if the display name normalizes to nothing, since an empty key must never match anything.
    pub fn from_display(name: &str) -> Option<Self> {
        let key = normalize_identity(name);
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MemberKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------       SpawnKey        ---------------------------------------------------------
/// Identifies a spawn event: the canonical boss label and the normalized `MM/DD/YY HH:MM` timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpawnKey {
    pub boss: String,
    pub timestamp: String,
}

impl SpawnKey {
    pub fn new<S: Into<String>, T: Into<String>>(boss: S, timestamp: T) -> Self {
        Self { boss: boss.into(), timestamp: timestamp.into() }
    }
}

impl Display for SpawnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.boss, self.timestamp)
    }
}

//--------------------------------------     MemberBalance     ---------------------------------------------------------
/// One member's reconciled position in the point ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberBalance {
    pub member: String,
    pub key: MemberKey,
    pub total_credit: Points,
    pub points_consumed: Points,
    pub points_left: Points,
}

//--------------------------------------        ItemId         ---------------------------------------------------------
/// The stable identifier of an auction item. Rows move and get deleted; the id does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn random() -> Self {
        let ts = chrono::Utc::now().timestamp();
        let nonce: u16 = rand::random::<u16>() % 9000 + 1000;
        Self(format!("a_{ts}_{nonce}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ItemId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

//--------------------------------------      ItemSource       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemSource {
    /// Listed as a row of the working items table by an editor or via `list_item`.
    Sheet,
    /// Added to the in-memory manual queue; only written to the working table when it is settled.
    Queue,
}

impl Display for ItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemSource::Sheet => write!(f, "Sheet"),
            ItemSource::Queue => write!(f, "Queue"),
        }
    }
}

impl From<String> for ItemSource {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queue" | "queuelist" | "manual" => ItemSource::Queue,
            _ => ItemSource::Sheet,
        }
    }
}

//--------------------------------------      ItemStatus       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Waiting for a session to open bidding.
    Queued,
    /// Bidding is open.
    Open,
    /// Bidding closed with a winner. The row is eligible for archival.
    Settled { winner: String, winning_bid: Points, bid_count: u32 },
    /// Moved to the archive table. Terminal.
    Archived,
}

impl ItemStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Open => "open",
            ItemStatus::Settled { .. } => "settled",
            ItemStatus::Archived => "archived",
        }
    }

    pub fn has_winner(&self) -> bool {
        matches!(self, ItemStatus::Settled { .. })
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Settled { winner, winning_bid, .. } => write!(f, "settled ({winner}, {winning_bid})"),
            s => f.write_str(s.name()),
        }
    }
}

//--------------------------------------      AuctionItem      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionItem {
    pub id: ItemId,
    pub label: String,
    pub start_price: Points,
    pub duration_minutes: u32,
    pub quantity: u32,
    pub source: ItemSource,
    pub boss: Option<String>,
    pub status: ItemStatus,
    pub auction_start: Option<String>,
    pub auction_end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuctionItem {
    pub label: String,
    /// When `None`, the price is taken from the catalog. New items without a price are rejected.
    pub start_price: Option<Points>,
    pub duration_minutes: u32,
    pub quantity: u32,
    pub boss: Option<String>,
}

impl NewAuctionItem {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self { label: label.into(), start_price: None, duration_minutes: 30, quantity: 1, boss: None }
    }

    pub fn with_start_price(mut self, price: Points) -> Self {
        self.start_price = Some(price);
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_boss<S: Into<String>>(mut self, boss: S) -> Self {
        self.boss = Some(boss.into());
        self
    }
}

//--------------------------------------      CatalogItem      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    pub last_start_price: Points,
}

impl CatalogItem {
    pub fn new<S: Into<String>>(name: S, last_start_price: Points) -> Self {
        Self { name: name.into(), last_start_price }
    }
}

//--------------------------------------       SessionId       ---------------------------------------------------------
/// An auction session is identified by its calendar day and a counter that increments within that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub day: NaiveDate,
    pub sequence: u32,
}

impl SessionId {
    /// The label of the ledger column that records this session's spend, e.g. `10/05/25 #2`.
    pub fn label(&self) -> String {
        format!("{} #{}", self.day.format("%m/%d/%y"), self.sequence)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cells() {
        assert!(Cell::Empty.is_empty());
        assert!(Cell::text("   ").is_empty());
        assert!(Cell::Bool(true).is_checked());
        assert!(Cell::text("TRUE").is_checked());
        assert!(!Cell::text("no").is_checked());
        assert_eq!(Cell::text("250").as_points().unwrap(), Some(Points::from(250)));
        assert_eq!(Cell::Empty.as_points().unwrap(), None);
        assert!(Cell::text("abc").as_points().is_err());
        assert_eq!(cell_at(&[Cell::Int(1)], 4), &Cell::Empty);
    }

    #[test]
    fn member_keys() {
        assert_eq!(MemberKey::from_display("Alice Smith"), MemberKey::from_display("  alice.smith!"));
        assert!(MemberKey::from_display(" -- ").is_none());
    }

    #[test]
    fn session_label() {
        let id = SessionId { day: NaiveDate::from_ymd_opt(2025, 10, 5).unwrap(), sequence: 2 };
        assert_eq!(id.label(), "10/05/25 #2");
    }
}
