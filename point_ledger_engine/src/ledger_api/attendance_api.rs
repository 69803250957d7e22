use std::{collections::HashSet, fmt::Debug};

use log::*;

use crate::{
    db_types::{Cell, MemberKey, Row, SpawnKey},
    ledger_api::{
        errors::LedgerError,
        ledger_api::LedgerApi,
        objects::AttendanceResult,
    },
    normalize::{normalize_timestamp_in, parse_canonical},
    services::ProcessLock,
    sheets::{attendance_layout, attendance_table_name, AttendanceSheet},
    traits::{LockService, TabularDatastore},
};

/// `AttendanceApi` records boss spawns in the weekly attendance tables.
///
/// Each submission adds one spawn column and then reconciles the ledger and the attendance totals before the lock
/// is released, so no reader ever sees the new attendance without the matching balances.
pub struct AttendanceApi<B, L: LockService = ProcessLock> {
    ledger: LedgerApi<B, L>,
}

impl<B: Clone, L: LockService> Clone for AttendanceApi<B, L> {
    fn clone(&self) -> Self {
        Self { ledger: self.ledger.clone() }
    }
}

impl<B, L: LockService> Debug for AttendanceApi<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AttendanceApi")
    }
}

impl<B, L: LockService> AttendanceApi<B, L> {
    pub fn new(ledger: LedgerApi<B, L>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &LedgerApi<B, L> {
        &self.ledger
    }
}

impl<B, L> AttendanceApi<B, L>
where
    B: TabularDatastore,
    L: LockService,
{
    /// Records that `members` attended the spawn of `boss` at `timestamp`.
    ///
    /// The timestamp may be in any recognised date format. The spawn goes into the period table for its (normalized)
    /// date, which is created if needed. A spawn whose boss and normalized timestamp are already present in that
    /// table is rejected with [`LedgerError::DuplicateColumn`].
    pub async fn submit_attendance(
        &self,
        boss: &str,
        timestamp: &str,
        members: &[&str],
    ) -> Result<AttendanceResult, LedgerError> {
        let config = self.ledger.config();
        let boss = match (config.bosses.is_empty(), config.bosses.canonical_name(boss)) {
            (_, Some(name)) => name.to_string(),
            (true, None) if !boss.trim().is_empty() => boss.trim().to_string(),
            _ => return Err(LedgerError::InvalidInput(format!("'{boss}' is not a known boss"))),
        };
        let normalized = normalize_timestamp_in(timestamp, &config.timezone)
            .ok_or_else(|| LedgerError::InvalidInput(format!("'{timestamp}' is not a recognisable timestamp")))?;
        let day = parse_canonical(&normalized)
            .map(|dt| dt.date())
            .ok_or_else(|| LedgerError::InvalidInput(format!("'{normalized}' is not a canonical timestamp")))?;
        let mut seen = HashSet::new();
        let mut attendees: Vec<(MemberKey, String)> = Vec::new();
        let mut duplicates_ignored = 0;
        for name in members {
            match MemberKey::from_display(name) {
                Some(key) if seen.insert(key.clone()) => attendees.push((key, name.trim().to_string())),
                Some(_) => duplicates_ignored += 1,
                None => debug!("📋 Ignoring the blank attendee name '{name}'"),
            }
        }
        if attendees.is_empty() {
            return Err(LedgerError::InvalidInput("An attendance submission needs at least one member".into()));
        }
        let spawn = SpawnKey::new(boss.as_str(), normalized.as_str());
        let table = attendance_table_name(day);

        let gate = self.ledger.gate();
        let _op = gate.begin_manual();
        let guard = gate.lock().await?;
        let db = self.ledger.db();
        if db.ensure_table(&table, &[Cell::from("Spawn")]).await? {
            info!("📋 Created attendance table {table}");
            db.write_range(&table, attendance_layout::BOSS_ROW, 0, vec![vec![Cell::from("Boss")]]).await?;
        }
        let rows = db.read_table(&table).await?;
        let sheet = AttendanceSheet::parse(&table, &rows, &config.timezone);
        if sheet.find_spawn(&spawn, &config.bosses).is_some() {
            return Err(LedgerError::DuplicateColumn(spawn.to_string()));
        }
        let column = sheet.next_column();
        let first_new_row = sheet.row_count.max(attendance_layout::FIRST_MEMBER_ROW);
        let new_members = attendees.iter().filter(|(key, _)| sheet.find_member(key).is_none()).collect::<Vec<_>>();
        if !new_members.is_empty() {
            let names = new_members.iter().map(|(_, name)| vec![Cell::from(name.as_str())]).collect::<Vec<Row>>();
            db.write_range(&table, first_new_row, attendance_layout::MEMBER_COL, names).await?;
        }
        let member_rows = sheet.members.iter().map(|m| (m.row, &m.key)).collect::<Vec<_>>();
        let last_row = first_new_row + new_members.len();
        let values = (0..last_row)
            .map(|row| {
                let cell = match row {
                    attendance_layout::TIMESTAMP_ROW => Cell::from(normalized.as_str()),
                    attendance_layout::BOSS_ROW => Cell::from(boss.as_str()),
                    r if r >= first_new_row => Cell::Bool(true),
                    r => match member_rows.iter().find(|(mr, _)| *mr == r) {
                        Some((_, key)) => Cell::Bool(attendees.iter().any(|(k, _)| k == *key)),
                        None => Cell::Empty,
                    },
                };
                vec![cell]
            })
            .collect::<Vec<Row>>();
        db.write_range(&table, 0, column, values).await?;
        info!(
            "📋 Recorded {} attendees for {spawn} in {table} column {column} ({} new)",
            attendees.len(),
            new_members.len()
        );
        let new_members = new_members.len();

        let mut warnings = Vec::new();
        let reconciled = self.ledger.recompute_after_write(&guard, &mut warnings).await;
        drop(guard);
        if let Some(result) = reconciled {
            warnings.extend(result.warnings.iter().cloned());
            self.ledger.publish_reconciled(&result).await;
        }
        Ok(AttendanceResult {
            table,
            column,
            spawn,
            recorded: attendees.len(),
            new_members,
            duplicates_ignored,
            warnings,
        })
    }
}
