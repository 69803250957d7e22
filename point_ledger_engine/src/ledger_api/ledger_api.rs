use std::{fmt::Debug, sync::Arc};

use ledger_common::Points;
use log::*;

use crate::{
    config::EngineConfig,
    db_types::{cell_at, Cell, MemberBalance, MemberKey, Row},
    events::{EventProducers, LedgerReconciledEvent},
    gate::{classify_edit, EditEffect, EditEvent, Gate, LockGuard, RecomputeTarget},
    ledger_api::{
        errors::{LedgerError, LedgerWarning},
        ledger_cache::LedgerCache,
        objects::{EditOutcome, LedgerSnapshot, LedgerView, ReconcileResult, RemovedMember, TotalsResult, TriggerOutcome},
    },
    reconcile::{plan_ledger, plan_totals, scan_attendance, totals_rows, LedgerPlan},
    services::{MemoryCache, ProcessLock},
    sheets::{
        attendance_layout,
        header,
        is_attendance_table,
        LedgerSheet,
        ARCHIVE_TABLE,
        AUCTION_LOG_HEADER,
        AUCTION_LOG_TABLE,
        ITEMS_HEADER,
        ITEMS_TABLE,
        LEDGER_HEADER,
        LEDGER_TABLE,
        TOTALS_HEADER,
        TOTALS_TABLE,
    },
    traits::{CacheService, DatastoreError, LockService, TabularDatastore},
};

/// `LedgerApi` owns the point ledger: it reconciles balances, serves cached reads and reacts to raw edits.
///
/// The attendance and auction APIs are built on top of a `LedgerApi` and share its gate and cache.
pub struct LedgerApi<B, L: LockService = ProcessLock> {
    db: B,
    gate: Arc<Gate<L>>,
    cache: LedgerCache,
    config: Arc<EngineConfig>,
    producers: EventProducers,
}

impl<B: Clone, L: LockService> Clone for LedgerApi<B, L> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            gate: Arc::clone(&self.gate),
            cache: self.cache.clone(),
            config: Arc::clone(&self.config),
            producers: self.producers.clone(),
        }
    }
}

impl<B, L: LockService> Debug for LedgerApi<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi")
    }
}

impl<B> LedgerApi<B, ProcessLock> {
    /// Creates an API backed by an in-process lock and an in-memory cache.
    pub fn new(db: B, config: EngineConfig, producers: EventProducers) -> Self {
        let lock = ProcessLock::new();
        Self::with_services(db, lock, Arc::new(MemoryCache::new()), config, producers)
    }
}

impl<B, L: LockService> LedgerApi<B, L> {
    pub fn with_services(
        db: B,
        lock: L,
        cache: Arc<dyn CacheService>,
        config: EngineConfig,
        producers: EventProducers,
    ) -> Self {
        let gate = Arc::new(Gate::new(lock, config.lock_timeout, config.debounce_window));
        let cache = LedgerCache::new(cache, config.cache_ttl);
        Self { db, gate, cache, config: Arc::new(config), producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn gate(&self) -> &Gate<L> {
        &self.gate
    }

    pub fn cache(&self) -> &LedgerCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn producers(&self) -> &EventProducers {
        &self.producers
    }
}

impl<B, L> LedgerApi<B, L>
where
    B: TabularDatastore,
    L: LockService,
{
    /// Creates any missing engine tables with their headers.
    pub async fn initialize(&self) -> Result<(), LedgerError> {
        let tables: [(&str, &[&str]); 5] = [
            (LEDGER_TABLE, &LEDGER_HEADER),
            (TOTALS_TABLE, &TOTALS_HEADER),
            (ITEMS_TABLE, &ITEMS_HEADER),
            (ARCHIVE_TABLE, &ITEMS_HEADER),
            (AUCTION_LOG_TABLE, &AUCTION_LOG_HEADER),
        ];
        for (name, columns) in tables {
            if self.db.ensure_table(name, &header(columns)).await? {
                info!("🗃️ Created the {name} table");
            }
        }
        Ok(())
    }

    //----------------------------------------   Reading   --------------------------------------------------------

    /// Returns the point map. Served from the cache when possible, unless `force_fresh` is set.
    pub async fn get_ledger(&self, force_fresh: bool) -> Result<LedgerView, LedgerError> {
        if !force_fresh {
            if let Some(snapshot) = self.cache.get() {
                return Ok(LedgerView { snapshot, from_cache: true });
            }
        }
        let generation = self.cache.generation();
        let snapshot = self.read_snapshot().await?;
        self.cache.populate(generation, &snapshot);
        Ok(LedgerView { snapshot, from_cache: false })
    }

    async fn read_snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let rows = match self.db.read_table(LEDGER_TABLE).await {
            Ok(rows) => rows,
            Err(DatastoreError::TableNotFound(_)) => return Ok(LedgerSnapshot::default()),
            Err(e) => return Err(e.into()),
        };
        let sheet = LedgerSheet::parse(&rows);
        let balances = sheet
            .entries
            .into_iter()
            .map(|e| {
                let points_left = e.points_left.as_points().ok().flatten().unwrap_or_default();
                let points_consumed = e.points_consumed.as_points().ok().flatten().unwrap_or_default();
                MemberBalance {
                    member: e.member,
                    key: e.key,
                    total_credit: points_left + points_consumed,
                    points_consumed,
                    points_left,
                }
            })
            .collect();
        Ok(LedgerSnapshot { balances })
    }

    pub(crate) async fn read_table_or_create(&self, name: &str, columns: &[&str]) -> Result<Vec<Row>, DatastoreError> {
        match self.db.read_table(name).await {
            Ok(rows) => Ok(rows),
            Err(DatastoreError::TableNotFound(_)) => {
                let header = header(columns);
                self.db.ensure_table(name, &header).await?;
                Ok(vec![header])
            },
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn read_attendance_tables(&self) -> Result<Vec<(String, Vec<Row>)>, DatastoreError> {
        let mut result = Vec::new();
        for name in self.db.table_names().await?.into_iter().filter(|n| is_attendance_table(n)) {
            let rows = self.db.read_table(&name).await?;
            result.push((name, rows));
        }
        Ok(result)
    }

    //----------------------------------------  Reconciling  ------------------------------------------------------

    /// Explicitly recomputes every ledger balance.
    pub async fn reconcile_ledger(&self) -> Result<ReconcileResult, LedgerError> {
        let _op = self.gate.begin_manual();
        let guard = self.gate.lock().await?;
        let result = self.reconcile_ledger_locked(&guard).await?;
        self.gate.record_run(RecomputeTarget::Ledger);
        drop(guard);
        self.publish_reconciled(&result).await;
        Ok(result)
    }

    /// One full reconciliation, retried from a fresh read if any step fails.
    pub(crate) async fn reconcile_ledger_locked(&self, _guard: &LockGuard<'_, L>) -> Result<ReconcileResult, LedgerError> {
        let retries = self.config.reconcile_retries.max(1);
        let mut last_error = DatastoreError::DatabaseError("reconciliation was not attempted".into());
        for attempt in 1..=retries {
            match self.ledger_pass().await {
                Ok((plan, wrote)) => {
                    if wrote {
                        self.cache.invalidate();
                    }
                    info!(
                        "🧮 Ledger reconciled for {} members (attempt {attempt}, {} warnings)",
                        plan.balances.len(),
                        plan.warnings.len()
                    );
                    return Ok(ReconcileResult { balances: plan.balances, warnings: plan.warnings, attempts: attempt });
                },
                Err(e) => {
                    warn!("🧮 Reconciliation pass {attempt}/{retries} failed. {e}");
                    // A failed bulk write may have landed partially
                    self.cache.invalidate();
                    last_error = e;
                },
            }
        }
        error!("🧮 Giving up on reconciliation after {retries} attempts. {last_error}");
        Err(LedgerError::ReconcileFailed { attempts: retries, last_error })
    }

    async fn ledger_pass(&self) -> Result<(LedgerPlan, bool), DatastoreError> {
        let rows = self.read_table_or_create(LEDGER_TABLE, &LEDGER_HEADER).await?;
        let tables = self.read_attendance_tables().await?;
        let scan = scan_attendance(&tables, &self.config.bosses, &self.config.timezone);
        let plan = plan_ledger(&rows, &scan);
        if plan.values.is_empty() || plan.is_noop(&rows) {
            trace!("🧮 Ledger balances are already up to date");
            return Ok((plan, false));
        }
        self.db.write_range(LEDGER_TABLE, plan.first_row(), plan.first_col(), plan.values.clone()).await?;
        Ok((plan, true))
    }

    /// Explicitly rebuilds the attendance summary table.
    pub async fn reconcile_attendance_totals(&self) -> Result<TotalsResult, LedgerError> {
        let _op = self.gate.begin_manual();
        let guard = self.gate.lock().await?;
        let result = self.reconcile_attendance_totals_locked(&guard).await?;
        self.gate.record_run(RecomputeTarget::AttendanceTotals);
        Ok(result)
    }

    pub(crate) async fn reconcile_attendance_totals_locked(
        &self,
        _guard: &LockGuard<'_, L>,
    ) -> Result<TotalsResult, LedgerError> {
        let retries = self.config.reconcile_retries.max(1);
        let mut last_error = DatastoreError::DatabaseError("totals were not attempted".into());
        for attempt in 1..=retries {
            match self.totals_pass().await {
                Ok(result) => {
                    info!("📋 Attendance totals rebuilt for {} members", result.totals.len());
                    return Ok(result);
                },
                Err(e) => {
                    warn!("📋 Attendance totals pass {attempt}/{retries} failed. {e}");
                    last_error = e;
                },
            }
        }
        Err(LedgerError::ReconcileFailed { attempts: retries, last_error })
    }

    async fn totals_pass(&self) -> Result<TotalsResult, DatastoreError> {
        let existing = self.read_table_or_create(TOTALS_TABLE, &TOTALS_HEADER).await?;
        let tables = self.read_attendance_tables().await?;
        let scan = scan_attendance(&tables, &self.config.bosses, &self.config.timezone);
        let totals = plan_totals(&scan);
        let mut values = vec![header(&TOTALS_HEADER)];
        values.extend(totals_rows(&totals));
        let written = values.len();
        self.db.write_range(TOTALS_TABLE, 0, 0, values).await?;
        for row in (written..existing.len()).rev() {
            self.db.delete_row(TOTALS_TABLE, row).await?;
        }
        Ok(TotalsResult { totals, warnings: scan.warnings })
    }

    /// Recomputes both targets under an already-held lock, after the caller's own write has succeeded. Failures are
    /// reported as warnings.
    pub(crate) async fn recompute_after_write(
        &self,
        guard: &LockGuard<'_, L>,
        warnings: &mut Vec<LedgerWarning>,
    ) -> Option<ReconcileResult> {
        let reconciled = match self.reconcile_ledger_locked(guard).await {
            Ok(r) => {
                self.gate.record_run(RecomputeTarget::Ledger);
                Some(r)
            },
            Err(e) => {
                warnings.push(LedgerWarning::RecomputeFailed { target: "ledger".into(), reason: e.to_string() });
                None
            },
        };
        match self.reconcile_attendance_totals_locked(guard).await {
            Ok(_) => self.gate.record_run(RecomputeTarget::AttendanceTotals),
            Err(e) => warnings
                .push(LedgerWarning::RecomputeFailed { target: "attendance totals".into(), reason: e.to_string() }),
        }
        self.cache.invalidate();
        reconciled
    }

    pub(crate) async fn publish_reconciled(&self, result: &ReconcileResult) {
        for emitter in &self.producers.ledger_reconciled_producer {
            debug!("📬️ Notifying ledger reconciled hook subscribers");
            let event = LedgerReconciledEvent::new(result.balances.clone(), result.warnings.clone());
            emitter.publish_event(event).await;
        }
    }

    //----------------------------------------   Reacting   -------------------------------------------------------

    /// The reactive entry point for a raw edit to the datastore.
    ///
    /// Edits that feed the ledger trigger a recomputation of the relevant targets, subject to the debounce window
    /// and manual-operation suppression. A lock timeout is returned as an error, never swallowed.
    pub async fn on_edit(&self, edit: &EditEvent) -> Result<EditOutcome, LedgerError> {
        let effect = classify_edit(edit);
        let mut triggers = Vec::new();
        match &effect {
            EditEffect::Ignore => trace!("🚦 Ignoring edit to {} ({}, {})", edit.table, edit.row, edit.col),
            EditEffect::InvalidateCache => self.cache.invalidate(),
            EditEffect::Recompute(targets) => {
                self.cache.invalidate();
                for target in targets {
                    let outcome = self.trigger(*target).await?;
                    triggers.push((*target, outcome));
                }
            },
        }
        Ok(EditOutcome { effect, triggers })
    }

    /// A reactive recomputation of a single target.
    pub async fn trigger(&self, target: RecomputeTarget) -> Result<TriggerOutcome, LedgerError> {
        let claim = match self.gate.try_claim(target) {
            Ok(claim) => claim,
            Err(skipped) => return Ok(TriggerOutcome::Skipped(skipped)),
        };
        let guard = self.gate.lock().await?;
        match target {
            RecomputeTarget::Ledger => {
                let result = self.reconcile_ledger_locked(&guard).await?;
                drop(guard);
                claim.commit();
                self.publish_reconciled(&result).await;
            },
            RecomputeTarget::AttendanceTotals => {
                self.reconcile_attendance_totals_locked(&guard).await?;
                claim.commit();
            },
        }
        Ok(TriggerOutcome::Ran)
    }

    //----------------------------------------   Members   --------------------------------------------------------

    /// Adds a ledger row for a member, then reconciles so their balance reflects any attendance already recorded.
    pub async fn add_member(&self, name: &str) -> Result<MemberBalance, LedgerError> {
        let key = MemberKey::from_display(name)
            .ok_or_else(|| LedgerError::InvalidInput(format!("'{name}' is not a usable member name")))?;
        let _op = self.gate.begin_manual();
        let guard = self.gate.lock().await?;
        let rows = self.read_table_or_create(LEDGER_TABLE, &LEDGER_HEADER).await?;
        if LedgerSheet::parse(&rows).find(&key).is_some() {
            return Err(LedgerError::InvalidInput(format!("{name} is already in the ledger")));
        }
        let member = name.trim().to_string();
        self.db
            .append_row(LEDGER_TABLE, vec![Cell::from(member.as_str()), Cell::from(Points::zero()), Cell::from(Points::zero())])
            .await?;
        self.cache.invalidate();
        info!("🧮 Added {member} to the ledger");
        let result = self.reconcile_ledger_locked(&guard).await?;
        self.gate.record_run(RecomputeTarget::Ledger);
        drop(guard);
        self.publish_reconciled(&result).await;
        result
            .balance(&key)
            .cloned()
            .ok_or_else(|| LedgerError::InvalidInput(format!("{member} disappeared from the ledger while being added")))
    }

    /// Deletes the member's rows from every ledger table except the settlement archive and the auction log.
    pub async fn remove_member(&self, name: &str) -> Result<RemovedMember, LedgerError> {
        let key = MemberKey::from_display(name)
            .ok_or_else(|| LedgerError::InvalidInput(format!("'{name}' is not a usable member name")))?;
        let _op = self.gate.begin_manual();
        let guard = self.gate.lock().await?;
        let mut tables = vec![(LEDGER_TABLE.to_string(), 1), (TOTALS_TABLE.to_string(), 1)];
        for name in self.db.table_names().await?.into_iter().filter(|n| is_attendance_table(n)) {
            tables.push((name, attendance_layout::FIRST_MEMBER_ROW));
        }
        let mut removed_rows = Vec::new();
        for (table, first_row) in tables {
            let rows = match self.db.read_table(&table).await {
                Ok(rows) => rows,
                Err(DatastoreError::TableNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let matching = rows
                .iter()
                .enumerate()
                .skip(first_row)
                .filter(|(_, r)| MemberKey::from_display(&cell_at(r, 0).as_text()).as_ref() == Some(&key))
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            for row in matching.into_iter().rev() {
                self.db.delete_row(&table, row).await?;
                removed_rows.push((table.clone(), row));
            }
        }
        self.cache.invalidate();
        info!("🧮 Removed {} rows for {name}", removed_rows.len());
        let mut warnings = Vec::new();
        let reconciled = self.recompute_after_write(&guard, &mut warnings).await;
        drop(guard);
        for w in &warnings {
            warn!("🧮 {w}");
        }
        if let Some(result) = reconciled {
            self.publish_reconciled(&result).await;
        }
        Ok(RemovedMember { member: name.trim().to_string(), removed_rows })
    }
}
