//! Table names, header layouts and typed views over the raw rows of each table.
//!
//! All indices are 0-based. Parsing never fails on malformed cells: anything the engine cannot interpret is skipped
//! or reported by the caller.
use chrono::{Datelike, Duration, NaiveDate};
use ledger_common::Points;

use crate::{
    boss_registry::BossRegistry,
    db_types::{cell_at, AuctionItem, Cell, ItemId, ItemSource, ItemStatus, MemberKey, Row, SpawnKey},
    normalize::normalize_timestamp_in,
};

pub const LEDGER_TABLE: &str = "BiddingPoints";
pub const TOTALS_TABLE: &str = "TotalAttendance";
pub const ITEMS_TABLE: &str = "BiddingItems";
pub const ARCHIVE_TABLE: &str = "ForDistribution";
pub const AUCTION_LOG_TABLE: &str = "AuctionLog";
pub const STATE_TABLE: &str = "_EngineState";
pub const ATTENDANCE_PREFIX: &str = "ATTENDANCE_WEEK_";

pub const LEDGER_HEADER: [&str; 3] = ["Member", "Points Left", "Points Consumed"];
pub const TOTALS_HEADER: [&str; 3] = ["Member", "Total Credit", "Spawns Attended"];
pub const ITEMS_HEADER: [&str; 13] = [
    "Id",
    "Item",
    "Start Price",
    "Duration",
    "Quantity",
    "Source",
    "Boss",
    "Winner",
    "Winning Bid",
    "Bid Count",
    "Auction Start",
    "Auction End",
    "Status",
];
pub const AUCTION_LOG_HEADER: [&str; 8] =
    ["Session", "Item Id", "Item", "Winner", "Winning Bid", "Bid Count", "Source", "Settled At"];

pub fn header(columns: &[&str]) -> Row {
    columns.iter().map(|c| Cell::from(*c)).collect()
}

pub mod ledger_cols {
    pub const MEMBER: usize = 0;
    pub const POINTS_LEFT: usize = 1;
    pub const POINTS_CONSUMED: usize = 2;
    pub const FIRST_SESSION: usize = 3;
}

pub mod attendance_layout {
    pub const TIMESTAMP_ROW: usize = 0;
    pub const BOSS_ROW: usize = 1;
    pub const FIRST_MEMBER_ROW: usize = 2;
    pub const MEMBER_COL: usize = 0;
    pub const FIRST_SPAWN_COL: usize = 1;
}

pub mod item_cols {
    pub const ID: usize = 0;
    pub const ITEM: usize = 1;
    pub const START_PRICE: usize = 2;
    pub const DURATION: usize = 3;
    pub const QUANTITY: usize = 4;
    pub const SOURCE: usize = 5;
    pub const BOSS: usize = 6;
    pub const WINNER: usize = 7;
    pub const WINNING_BID: usize = 8;
    pub const BID_COUNT: usize = 9;
    pub const AUCTION_START: usize = 10;
    pub const AUCTION_END: usize = 11;
    pub const STATUS: usize = 12;
}

//--------------------------------------  Attendance periods   ---------------------------------------------------------

/// The Sunday that starts the week containing `day`.
pub fn period_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_sunday()))
}

pub fn attendance_table_name(day: NaiveDate) -> String {
    format!("{ATTENDANCE_PREFIX}{}", period_start(day).format("%Y%m%d"))
}

pub fn is_attendance_table(name: &str) -> bool {
    name.strip_prefix(ATTENDANCE_PREFIX)
        .map(|d| NaiveDate::parse_from_str(d, "%Y%m%d").is_ok())
        .unwrap_or(false)
}

//--------------------------------------     Ledger table      ---------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub row: usize,
    pub member: String,
    pub key: MemberKey,
    /// The raw cells under each session column, in header order.
    pub spend: Vec<Cell>,
    pub points_left: Cell,
    pub points_consumed: Cell,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerSheet {
    pub header: Row,
    /// `(column index, label)` for every session column with a non-empty header.
    pub sessions: Vec<(usize, String)>,
    pub entries: Vec<LedgerEntry>,
    /// Index one past the last row, i.e. where a new column's values stop.
    pub row_count: usize,
}

impl LedgerSheet {
    pub fn parse(rows: &[Row]) -> Self {
        let header = rows.first().cloned().unwrap_or_default();
        let sessions = header
            .iter()
            .enumerate()
            .skip(ledger_cols::FIRST_SESSION)
            .filter(|(_, c)| !c.is_empty())
            .map(|(i, c)| (i, c.as_text().trim().to_string()))
            .collect::<Vec<_>>();
        let entries = rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(row, cells)| {
                let member = cell_at(cells, ledger_cols::MEMBER).as_text().trim().to_string();
                let key = MemberKey::from_display(&member)?;
                let spend = sessions.iter().map(|(col, _)| cell_at(cells, *col).clone()).collect();
                Some(LedgerEntry {
                    row,
                    member,
                    key,
                    spend,
                    points_left: cell_at(cells, ledger_cols::POINTS_LEFT).clone(),
                    points_consumed: cell_at(cells, ledger_cols::POINTS_CONSUMED).clone(),
                })
            })
            .collect();
        Self { header, sessions, entries, row_count: rows.len() }
    }

    /// The index at which a new session column would be written.
    pub fn next_column(&self) -> usize {
        let used = self.header.iter().rposition(|c| !c.is_empty()).map(|i| i + 1).unwrap_or(0);
        used.max(ledger_cols::FIRST_SESSION)
    }

    pub fn has_session(&self, label: &str) -> bool {
        self.sessions.iter().any(|(_, l)| l.eq_ignore_ascii_case(label.trim()))
    }

    pub fn find(&self, key: &MemberKey) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }
}

//--------------------------------------   Attendance tables   ---------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SpawnColumn {
    pub col: usize,
    pub boss: String,
    /// The normalized timestamp, or the raw header text if it could not be normalized.
    pub timestamp: String,
    pub normalized: bool,
}

impl SpawnColumn {
    pub fn key(&self) -> SpawnKey {
        SpawnKey::new(self.boss.clone(), self.timestamp.clone())
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub row: usize,
    pub member: String,
    pub key: MemberKey,
    /// One entry per spawn column, in the same order as [`AttendanceSheet::spawns`].
    pub attended: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct AttendanceSheet {
    pub name: String,
    pub spawns: Vec<SpawnColumn>,
    pub members: Vec<AttendanceRow>,
    pub row_count: usize,
}

impl AttendanceSheet {
    pub fn parse(name: &str, rows: &[Row], tz: &chrono::FixedOffset) -> Self {
        use attendance_layout::*;
        let empty = Vec::new();
        let timestamps = rows.get(TIMESTAMP_ROW).unwrap_or(&empty);
        let bosses = rows.get(BOSS_ROW).unwrap_or(&empty);
        let width = timestamps.len().max(bosses.len());
        let spawns = (FIRST_SPAWN_COL..width)
            .filter_map(|col| {
                let boss = cell_at(bosses, col).as_text().trim().to_string();
                let raw_ts = cell_at(timestamps, col).as_text().trim().to_string();
                if boss.is_empty() && raw_ts.is_empty() {
                    return None;
                }
                let (timestamp, normalized) = match normalize_timestamp_in(&raw_ts, tz) {
                    Some(ts) => (ts, true),
                    None => (raw_ts, false),
                };
                Some(SpawnColumn { col, boss, timestamp, normalized })
            })
            .collect::<Vec<_>>();
        let members = rows
            .iter()
            .enumerate()
            .skip(FIRST_MEMBER_ROW)
            .filter_map(|(row, cells)| {
                let member = cell_at(cells, MEMBER_COL).as_text().trim().to_string();
                let key = MemberKey::from_display(&member)?;
                let attended = spawns.iter().map(|s| cell_at(cells, s.col).is_checked()).collect();
                Some(AttendanceRow { row, member, key, attended })
            })
            .collect();
        Self { name: name.to_string(), spawns, members, row_count: rows.len() }
    }

    /// The index at which a new spawn column would be written.
    pub fn next_column(&self) -> usize {
        self.spawns.last().map(|s| s.col + 1).unwrap_or(attendance_layout::FIRST_SPAWN_COL)
    }

    /// Finds the column for a spawn. Column boss labels are resolved through `bosses` first, so a column headed with
    /// an alias or a misspelling matches its canonical key.
    pub fn find_spawn(&self, key: &SpawnKey, bosses: &BossRegistry) -> Option<&SpawnColumn> {
        let wanted = bosses.canonical_name(&key.boss).unwrap_or(key.boss.as_str());
        self.spawns.iter().find(|s| {
            let boss = bosses.canonical_name(&s.boss).unwrap_or(s.boss.as_str());
            boss.trim().eq_ignore_ascii_case(wanted.trim()) && s.timestamp == key.timestamp
        })
    }

    pub fn find_member(&self, key: &MemberKey) -> Option<&AttendanceRow> {
        self.members.iter().find(|m| &m.key == key)
    }
}

//--------------------------------------      Item tables      ---------------------------------------------------------

fn optional_text(cell: &Cell) -> Option<String> {
    let text = cell.as_text().trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn count_cell(cell: &Cell, default: u32) -> u32 {
    cell.as_points()
        .ok()
        .flatten()
        .and_then(|p| u32::try_from(p.value()).ok())
        .unwrap_or(default)
}

/// Reads an item row from the working or archive table. Rows without a label are not items.
///
/// An item whose Winner column is filled in counts as settled whatever its status cell says, since editors fill
/// winners in by hand.
pub fn item_from_row(row: &[Cell]) -> Option<AuctionItem> {
    use item_cols::*;
    let label = optional_text(cell_at(row, ITEM))?;
    let id = optional_text(cell_at(row, ID)).map(ItemId::from).unwrap_or_else(|| ItemId::from(""));
    let winner = optional_text(cell_at(row, WINNER));
    let status_text = cell_at(row, STATUS).as_text().trim().to_ascii_lowercase();
    let status = match winner {
        Some(_) if status_text == "archived" => ItemStatus::Archived,
        Some(winner) => ItemStatus::Settled {
            winner,
            winning_bid: cell_at(row, WINNING_BID).as_points().ok().flatten().unwrap_or_default(),
            bid_count: count_cell(cell_at(row, BID_COUNT), 0),
        },
        None if status_text == "open" => ItemStatus::Open,
        None => ItemStatus::Queued,
    };
    Some(AuctionItem {
        id,
        label,
        start_price: cell_at(row, START_PRICE).as_points().ok().flatten().unwrap_or_default(),
        duration_minutes: count_cell(cell_at(row, DURATION), 30),
        quantity: count_cell(cell_at(row, QUANTITY), 1).max(1),
        source: ItemSource::from(cell_at(row, SOURCE).as_text()),
        boss: optional_text(cell_at(row, BOSS)),
        status,
        auction_start: optional_text(cell_at(row, AUCTION_START)),
        auction_end: optional_text(cell_at(row, AUCTION_END)),
    })
}

pub fn item_to_row(item: &AuctionItem) -> Row {
    let (winner, winning_bid, bid_count) = match &item.status {
        ItemStatus::Settled { winner, winning_bid, bid_count } => {
            (Cell::from(winner.as_str()), Cell::from(*winning_bid), Cell::Int(i64::from(*bid_count)))
        },
        _ => (Cell::Empty, Cell::Empty, Cell::Empty),
    };
    let text_or_empty = |v: &Option<String>| v.as_deref().map(Cell::from).unwrap_or_default();
    vec![
        Cell::from(item.id.as_str()),
        Cell::from(item.label.as_str()),
        Cell::from(item.start_price),
        Cell::Int(i64::from(item.duration_minutes)),
        Cell::Int(i64::from(item.quantity)),
        Cell::from(item.source.to_string()),
        text_or_empty(&item.boss),
        winner,
        winning_bid,
        bid_count,
        text_or_empty(&item.auction_start),
        text_or_empty(&item.auction_end),
        Cell::from(item.status.name()),
    ]
}

/// Every auction log row records the spend of one settled item.
pub fn auction_log_row(session: &str, item: &AuctionItem, settled_at: &str) -> Option<Row> {
    match &item.status {
        ItemStatus::Settled { winner, winning_bid, bid_count } => Some(vec![
            Cell::from(session),
            Cell::from(item.id.as_str()),
            Cell::from(item.label.as_str()),
            Cell::from(winner.as_str()),
            Cell::from(*winning_bid),
            Cell::Int(i64::from(*bid_count)),
            Cell::from(item.source.to_string()),
            Cell::from(settled_at),
        ]),
        _ => None,
    }
}

/// The price column of an archive or log row, used to build the catalog.
pub fn price_of(row: &[Cell], col: usize) -> Option<Points> {
    cell_at(row, col).as_points().ok().flatten()
}
