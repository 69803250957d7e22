use std::fmt::Write;

use anyhow::Result;
use point_ledger_engine::{
    catalog::CatalogMatch,
    db_types::{AuctionItem, MemberBalance},
    ledger_api::{AttendanceResult, AttendanceTotal, LedgerView, LedgerWarning, ReconcileResult, RemovedMember},
};
use prettytable::{
    format::{LinePosition, LineSeparator, TableFormat},
    row,
    Table,
};

fn markdown_format() -> TableFormat {
    prettytable::format::FormatBuilder::new()
        .column_separator('|')
        .borders('|')
        .separator(LinePosition::Title, LineSeparator::new('-', '|', '|', '|'))
        .padding(1, 1)
        .build()
}

fn markdown_style(table: &mut Table) {
    table.set_format(markdown_format());
}

pub fn format_balances(balances: &[MemberBalance]) -> String {
    if balances.is_empty() {
        return "The ledger has no members".to_string();
    }
    let mut table = Table::new();
    table.set_titles(row!["Member", "Key", "Total credit", "Points consumed", "Points left"]);
    for b in balances {
        table.add_row(row![b.member, b.key, r->b.total_credit, r->b.points_consumed, r->b.points_left]);
    }
    markdown_style(&mut table);
    table.to_string()
}

pub fn format_warnings(warnings: &[LedgerWarning]) -> String {
    warnings.iter().map(|w| format!("⚠️  {w}\n")).collect()
}

pub fn format_ledger_view(view: &LedgerView) -> Result<String> {
    let mut f = String::new();
    let source = if view.from_cache { "cache" } else { "datastore" };
    writeln!(f, "{} members (served from the {source})", view.snapshot.len())?;
    writeln!(f, "{}", format_balances(&view.snapshot.balances))?;
    Ok(f)
}

pub fn format_reconcile_result(result: &ReconcileResult) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Reconciled {} members in {} attempt(s)", result.balances.len(), result.attempts)?;
    writeln!(f, "{}", format_balances(&result.balances))?;
    write!(f, "{}", format_warnings(&result.warnings))?;
    Ok(f)
}

pub fn format_totals(totals: &[AttendanceTotal]) -> String {
    if totals.is_empty() {
        return "No attendance has been recorded".to_string();
    }
    let mut table = Table::new();
    table.set_titles(row!["Member", "Total credit", "Spawns attended"]);
    for t in totals {
        table.add_row(row![t.member, r->t.total_credit, r->t.spawns_attended]);
    }
    markdown_style(&mut table);
    table.to_string()
}

pub fn format_attendance_result(result: &AttendanceResult) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Recorded {} in {} (column {})", result.spawn, result.table, result.column)?;
    writeln!(
        f,
        "{} attendees, {} new to the period, {} duplicate names ignored",
        result.recorded, result.new_members, result.duplicates_ignored
    )?;
    write!(f, "{}", format_warnings(&result.warnings))?;
    Ok(f)
}

pub fn format_match(m: &CatalogMatch) -> Result<String> {
    let mut f = String::new();
    match &m.corrected_name {
        Some(name) if m.is_exact_match => writeln!(f, "'{name}' is in the catalog")?,
        Some(name) => writeln!(f, "'{}' looks like '{name}' ({:.0}% similar)", m.input, m.similarity * 100.0)?,
        None => writeln!(f, "'{}' is a new item (best similarity {:.0}%)", m.input, m.similarity * 100.0)?,
    }
    if let Some(price) = m.suggested_price {
        writeln!(f, "Suggested starting price: {price}")?;
    }
    Ok(f)
}

pub fn format_items(items: &[AuctionItem]) -> String {
    if items.is_empty() {
        return "No items".to_string();
    }
    let mut table = Table::new();
    table.set_titles(row!["Id", "Item", "Start price", "Qty", "Boss", "Source", "Status"]);
    for item in items {
        table.add_row(row![
            item.id.as_str(),
            item.label,
            r->item.start_price,
            r->item.quantity,
            item.boss.as_deref().unwrap_or_default(),
            item.source,
            item.status
        ]);
    }
    markdown_style(&mut table);
    table.to_string()
}

pub fn format_removed_member(removed: &RemovedMember) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Removed {} from {} rows", removed.member, removed.removed_rows.len())?;
    for (table, row) in &removed.removed_rows {
        writeln!(f, "  {table} row {row}")?;
    }
    Ok(f)
}
