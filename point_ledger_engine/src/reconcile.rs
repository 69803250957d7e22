//! # Ledger reconciliation
//!
//! Balances are never maintained incrementally. Each pass recomputes every member's position from scratch:
//!
//! * `consumed` is the sum of the member's session spend columns in the ledger,
//! * `total credit` is the sum, over every attendance period table, of the boss credit of each spawn the member is
//!   ticked for,
//! * `points left = total credit - consumed`.
//!
//! This module is pure: it turns table snapshots into a plan of cells to write. The ledger API applies the plan under
//! the lock and retries from a fresh read if the write fails.
use std::collections::HashMap;

use chrono::FixedOffset;
use ledger_common::Points;
use log::*;

use crate::{
    boss_registry::BossRegistry,
    db_types::{cell_at, Cell, MemberBalance, MemberKey, Row},
    ledger_api::{AttendanceTotal, LedgerWarning},
    sheets::{ledger_cols, AttendanceSheet, LedgerSheet},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberCredit {
    /// The first spelling of the member's name seen in the attendance tables.
    pub member: String,
    pub credit: Points,
    pub spawns: u32,
}

/// Attendance credit per member, across every period table, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct AttendanceScan {
    order: Vec<MemberKey>,
    credits: HashMap<MemberKey, MemberCredit>,
    pub warnings: Vec<LedgerWarning>,
}

impl AttendanceScan {
    pub fn credit_of(&self, key: &MemberKey) -> Points {
        self.credits.get(key).map(|c| c.credit).unwrap_or_default()
    }

    pub fn get(&self, key: &MemberKey) -> Option<&MemberCredit> {
        self.credits.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberKey, &MemberCredit)> {
        self.order.iter().filter_map(|k| self.credits.get(k).map(|c| (k, c)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn entry(&mut self, key: &MemberKey, member: &str) -> &mut MemberCredit {
        if !self.credits.contains_key(key) {
            self.order.push(key.clone());
        }
        self.credits
            .entry(key.clone())
            .or_insert_with(|| MemberCredit { member: member.to_string(), ..Default::default() })
    }
}

/// Parses every period table and sums each member's attendance credit.
pub fn scan_attendance(tables: &[(String, Vec<Row>)], bosses: &BossRegistry, tz: &FixedOffset) -> AttendanceScan {
    let mut scan = AttendanceScan::default();
    for (name, rows) in tables {
        let sheet = AttendanceSheet::parse(name, rows, tz);
        for spawn in sheet.spawns.iter().filter(|s| !s.normalized) {
            scan.warnings.push(LedgerWarning::UnparseableSpawnTimestamp {
                table: name.clone(),
                col: spawn.col,
                value: spawn.timestamp.clone(),
            });
        }
        let values = sheet.spawns.iter().map(|s| bosses.points_for(&s.boss)).collect::<Vec<_>>();
        for row in &sheet.members {
            let entry = scan.entry(&row.key, &row.member);
            for (attended, value) in row.attended.iter().zip(&values) {
                if *attended {
                    entry.credit = entry.credit.saturating_add(*value);
                    entry.spawns += 1;
                }
            }
        }
    }
    trace!("🧮 Scanned {} attendance tables covering {} members", tables.len(), scan.len());
    scan
}

/// The cells to write back to the ledger, and the balances they encode.
#[derive(Debug, Clone, Default)]
pub struct LedgerPlan {
    pub balances: Vec<MemberBalance>,
    /// Rows `1..=values.len()` of the `Points Left` and `Points Consumed` columns, in that column order.
    pub values: Vec<Row>,
    pub warnings: Vec<LedgerWarning>,
}

impl LedgerPlan {
    pub fn first_row(&self) -> usize {
        1
    }

    pub fn first_col(&self) -> usize {
        ledger_cols::POINTS_LEFT
    }

    /// True if applying the plan would change nothing.
    pub fn is_noop(&self, rows: &[Row]) -> bool {
        self.values.iter().enumerate().all(|(i, planned)| {
            let current = rows.get(i + 1).map(Vec::as_slice).unwrap_or_default();
            *cell_at(current, ledger_cols::POINTS_LEFT) == planned[0]
                && *cell_at(current, ledger_cols::POINTS_CONSUMED) == planned[1]
        })
    }
}

/// Recomputes every ledger balance. Rows without a member keep their current balance cells so that a single
/// rectangular write covers the table.
pub fn plan_ledger(ledger_rows: &[Row], scan: &AttendanceScan) -> LedgerPlan {
    let sheet = LedgerSheet::parse(ledger_rows);
    let mut plan = LedgerPlan::default();
    let mut seen: HashMap<&MemberKey, Vec<usize>> = HashMap::new();
    for entry in &sheet.entries {
        seen.entry(&entry.key).or_default().push(entry.row);
    }
    for (key, rows) in &seen {
        if rows.len() > 1 {
            let member = sheet.find(key).map(|e| e.member.clone()).unwrap_or_else(|| key.to_string());
            warn!("🧮 {member} has {} ledger rows ({rows:?}). Each row is reconciled independently", rows.len());
            plan.warnings.push(LedgerWarning::DuplicateLedgerRow { member, rows: rows.clone() });
        }
    }
    plan.warnings.sort_by_key(|w| format!("{w:?}"));
    let mut entries = sheet.entries.iter().peekable();
    let last_row = sheet.entries.last().map(|e| e.row).unwrap_or(0);
    for row in 1..=last_row {
        match entries.peek() {
            Some(entry) if entry.row == row => {
                let mut consumed = Points::zero();
                for ((_, session), cell) in sheet.sessions.iter().zip(&entry.spend) {
                    match cell.as_points() {
                        Ok(Some(p)) => match consumed.checked_add(p) {
                            Some(total) => consumed = total,
                            None => {
                                warn!("🧮 Spend of {p} in {session} overflows the total for {}. Counted as 0", entry.member);
                                plan.warnings.push(LedgerWarning::SpendOverflow {
                                    member: entry.member.clone(),
                                    session: session.clone(),
                                    value: cell.as_text(),
                                });
                            },
                        },
                        Ok(None) => {},
                        Err(_) => plan.warnings.push(LedgerWarning::UnparseableSpend {
                            member: entry.member.clone(),
                            session: session.clone(),
                            value: cell.as_text(),
                        }),
                    }
                }
                let total_credit = scan.credit_of(&entry.key);
                let points_left = total_credit.checked_sub(consumed).unwrap_or_else(|| {
                    warn!("🧮 The balance of {} is out of range and was capped", entry.member);
                    plan.warnings.push(LedgerWarning::BalanceOverflow { member: entry.member.clone() });
                    if consumed < Points::zero() {
                        Points::from(i64::MAX)
                    } else {
                        Points::from(i64::MIN)
                    }
                });
                plan.values.push(vec![Cell::from(points_left), Cell::from(consumed)]);
                plan.balances.push(MemberBalance {
                    member: entry.member.clone(),
                    key: entry.key.clone(),
                    total_credit,
                    points_consumed: consumed,
                    points_left,
                });
                entries.next();
            },
            _ => {
                let current = ledger_rows.get(row).map(Vec::as_slice).unwrap_or_default();
                plan.values.push(vec![
                    cell_at(current, ledger_cols::POINTS_LEFT).clone(),
                    cell_at(current, ledger_cols::POINTS_CONSUMED).clone(),
                ]);
            },
        }
    }
    for (key, credit) in scan.iter() {
        if sheet.find(key).is_none() {
            info!("🧮 {} has attendance credit but no ledger row. Not creating one", credit.member);
            plan.warnings.push(LedgerWarning::MemberNotInLedger { member: credit.member.clone(), credit: credit.credit });
        }
    }
    plan.warnings.extend(scan.warnings.iter().cloned());
    plan
}

/// The attendance summary, one row per member in first-seen order.
pub fn plan_totals(scan: &AttendanceScan) -> Vec<AttendanceTotal> {
    scan.iter()
        .map(|(key, c)| AttendanceTotal {
            member: c.member.clone(),
            key: key.clone(),
            total_credit: c.credit,
            spawns_attended: c.spawns,
        })
        .collect()
}

pub fn totals_rows(totals: &[AttendanceTotal]) -> Vec<Row> {
    totals
        .iter()
        .map(|t| vec![Cell::from(t.member.as_str()), Cell::from(t.total_credit), Cell::Int(i64::from(t.spawns_attended))])
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{normalize::default_timezone, sheets::LEDGER_HEADER};

    fn week(members: &[(&str, &[bool])], bosses: &[&str]) -> Vec<Row> {
        let mut rows = vec![vec![Cell::Empty], vec![Cell::Empty]];
        for (i, boss) in bosses.iter().enumerate() {
            rows[0].push(Cell::from(format!("10/0{}/25 09:00", i + 1)));
            rows[1].push(Cell::from(*boss));
        }
        for (name, ticks) in members {
            let mut row = vec![Cell::from(*name)];
            row.extend(ticks.iter().map(|t| Cell::Bool(*t)));
            rows.push(row);
        }
        rows
    }

    fn ledger(rows: &[(&str, &[i64])]) -> Vec<Row> {
        let mut header = crate::sheets::header(&LEDGER_HEADER);
        header.extend([Cell::from("S1"), Cell::from("S2")]);
        let mut result = vec![header];
        for (name, spend) in rows {
            let mut row = vec![Cell::from(*name), Cell::Empty, Cell::Empty];
            row.extend(spend.iter().map(|s| Cell::Int(*s)));
            result.push(row);
        }
        result
    }

    #[test]
    fn alice_smith_scenario() {
        let tables = vec![(
            "ATTENDANCE_WEEK_20250928".to_string(),
            week(&[("Alice Smith", &[true, true, true])], &["Venatus", "Venatus", "Livera"]),
        )];
        let scan = scan_attendance(&tables, &BossRegistry::default(), &default_timezone());
        let plan = plan_ledger(&ledger(&[("alice smith", &[2])]), &scan);
        let alice = &plan.balances[0];
        assert_eq!(alice.key.as_str(), "alicesmith");
        assert_eq!(alice.points_consumed, Points::from(2));
        assert_eq!(alice.points_left, Points::from(1));
        assert_eq!(alice.points_left + alice.points_consumed, alice.total_credit);
        assert_eq!(plan.values, vec![vec![Cell::Int(1), Cell::Int(2)]]);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn boss_values_and_multiple_periods() {
        let bosses = BossRegistry::default().with_boss("Guild Boss", Points::from(5), &["gb"]);
        let tables = vec![
            ("ATTENDANCE_WEEK_20250928".to_string(), week(&[("bob", &[true, false])], &["gb", "Venatus"])),
            ("ATTENDANCE_WEEK_20251005".to_string(), week(&[("Bob", &[true]), ("carol", &[true])], &["Venatus"])),
        ];
        let scan = scan_attendance(&tables, &bosses, &default_timezone());
        let bob = MemberKey::from_display("bob").unwrap();
        assert_eq!(scan.credit_of(&bob), Points::from(6));
        assert_eq!(scan.get(&bob).unwrap().spawns, 2);
        let plan = plan_ledger(&ledger(&[("Bob", &[4, 3])]), &scan);
        assert_eq!(plan.balances[0].points_left, Points::from(-1));
        assert!(plan.warnings.contains(&LedgerWarning::MemberNotInLedger { member: "carol".into(), credit: Points::from(1) }));
        let totals = plan_totals(&scan);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].member, "bob");
        assert_eq!(totals_rows(&totals)[0], vec![Cell::from("bob"), Cell::Int(6), Cell::Int(2)]);
    }

    #[test]
    fn reconciling_twice_is_idempotent() {
        let tables = vec![("ATTENDANCE_WEEK_20251005".to_string(), week(&[("dan", &[true, true])], &["a", "b"]))];
        let scan = scan_attendance(&tables, &BossRegistry::default(), &default_timezone());
        let mut rows = ledger(&[("dan", &[1]), ("erin", &[])]);
        let first = plan_ledger(&rows, &scan);
        for (i, values) in first.values.iter().enumerate() {
            rows[i + 1][1] = values[0].clone();
            rows[i + 1][2] = values[1].clone();
        }
        assert!(first.is_noop(&rows));
        let second = plan_ledger(&rows, &scan);
        assert_eq!(first.balances, second.balances);
        assert_eq!(first.values, second.values);
    }

    #[test]
    fn oversized_spend_is_reported_instead_of_summed() {
        let mut rows = ledger(&[("gina", &[]), ("hal", &[])]);
        rows[1].extend([Cell::from("9223372036854775807"), Cell::from("1")]);
        rows[2].push(Cell::Int(i64::MIN));
        let plan = plan_ledger(&rows, &AttendanceScan::default());
        let gina = &plan.balances[0];
        assert_eq!(gina.points_consumed, Points::from(i64::MAX));
        assert_eq!(gina.points_left, Points::from(-i64::MAX));
        assert!(plan.warnings.contains(&LedgerWarning::SpendOverflow {
            member: "gina".into(),
            session: "S2".into(),
            value: "1".into()
        }));
        let hal = &plan.balances[1];
        assert_eq!(hal.points_left, Points::from(i64::MAX));
        assert!(plan.warnings.contains(&LedgerWarning::BalanceOverflow { member: "hal".into() }));
    }

    #[test]
    fn blank_rows_garbage_and_duplicates() {
        let mut rows = ledger(&[("frank", &[1]), ("", &[]), ("Frank!", &[2])]);
        rows[2][1] = Cell::from("note");
        rows[3].push(Cell::from("lots"));
        let plan = plan_ledger(&rows, &AttendanceScan::default());
        assert_eq!(plan.values.len(), 3);
        assert_eq!(plan.values[1], vec![Cell::from("note"), Cell::Empty]);
        assert_eq!(plan.balances[1].points_consumed, Points::from(2));
        assert!(plan.warnings.iter().any(|w| matches!(w, LedgerWarning::DuplicateLedgerRow { rows, .. } if rows == &vec![1, 3])));
        assert!(plan.warnings.iter().any(|w| matches!(w, LedgerWarning::UnparseableSpend { value, .. } if value == "lots")));
    }
}
