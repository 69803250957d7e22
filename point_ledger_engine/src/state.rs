//! The engine's own persisted state, stored as one JSON document in [`STATE_TABLE`].
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Cell, SessionId},
    sheets::STATE_TABLE,
    traits::{CellRange, DatastoreError, TabularDatastore},
};

pub const ENGINE_STATE_SCHEMA_VERSION: u32 = 1;

/// Counters older than this are dropped when a session is started.
const SESSION_COUNTER_RETENTION_DAYS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub schema_version: u32,
    /// The last sequence number issued for each calendar day.
    #[serde(default)]
    pub session_counters: BTreeMap<NaiveDate, u32>,
    #[serde(default)]
    pub last_session: Option<SessionId>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            schema_version: ENGINE_STATE_SCHEMA_VERSION,
            session_counters: BTreeMap::new(),
            last_session: None,
            updated_at: None,
        }
    }
}

impl EngineState {
    /// Issues the next session id for `day` and prunes stale counters.
    pub fn next_session(&mut self, day: NaiveDate) -> SessionId {
        let seq = self.session_counters.entry(day).or_insert(0);
        *seq += 1;
        let id = SessionId { day, sequence: *seq };
        let cutoff = day - Duration::days(SESSION_COUNTER_RETENTION_DAYS);
        self.session_counters.retain(|d, _| *d >= cutoff);
        self.last_session = Some(id);
        id
    }

    /// Loads the state document. A missing table or an empty cell gives a fresh state; an undecodable document or a
    /// schema from the future is an error, since silently resetting the counters would reissue session labels.
    pub async fn load<B: TabularDatastore>(db: &B) -> Result<Self, DatastoreError> {
        let rows = match db.read_range(STATE_TABLE, CellRange::new(0, 0, 1, 1)).await {
            Ok(rows) => rows,
            Err(DatastoreError::TableNotFound(_)) => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        let json = rows.first().and_then(|r| r.first()).map(Cell::as_text).unwrap_or_default();
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let state: EngineState = serde_json::from_str(&json)?;
        if state.schema_version > ENGINE_STATE_SCHEMA_VERSION {
            return Err(DatastoreError::CorruptCell(format!(
                "engine state has schema version {}, but this build only understands up to {}",
                state.schema_version, ENGINE_STATE_SCHEMA_VERSION
            )));
        }
        Ok(state.upgrade())
    }

    pub async fn save<B: TabularDatastore>(&mut self, db: &B) -> Result<(), DatastoreError> {
        self.updated_at = Some(Utc::now());
        let json = serde_json::to_string(self).map_err(|e| DatastoreError::CorruptCell(e.to_string()))?;
        db.ensure_table(STATE_TABLE, &[]).await?;
        db.write_range(STATE_TABLE, 0, 0, vec![vec![Cell::Text(json)]]).await?;
        trace!("🗃️ Engine state saved");
        Ok(())
    }

    fn upgrade(mut self) -> Self {
        if self.schema_version < ENGINE_STATE_SCHEMA_VERSION {
            info!("🗃️ Upgrading engine state from schema {} to {ENGINE_STATE_SCHEMA_VERSION}", self.schema_version);
            self.schema_version = ENGINE_STATE_SCHEMA_VERSION;
        }
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::MemoryDatastore;

    #[test]
    fn sequences_restart_each_day() {
        let mut state = EngineState::default();
        let d1 = NaiveDate::from_ymd_opt(2025, 10, 5).unwrap();
        let d2 = d1.succ_opt().unwrap();
        assert_eq!(state.next_session(d1).sequence, 1);
        assert_eq!(state.next_session(d1).sequence, 2);
        assert_eq!(state.next_session(d2).sequence, 1);
        assert_eq!(state.last_session, Some(SessionId { day: d2, sequence: 1 }));
        let later = d1 + Duration::days(SESSION_COUNTER_RETENTION_DAYS + 1);
        state.next_session(later);
        assert!(!state.session_counters.contains_key(&d1));
    }

    #[tokio::test]
    async fn persists_through_the_datastore() {
        let db = MemoryDatastore::new();
        let mut state = EngineState::load(&db).await.unwrap();
        assert_eq!(state, EngineState::default());
        let day = NaiveDate::from_ymd_opt(2025, 10, 5).unwrap();
        state.next_session(day);
        state.save(&db).await.unwrap();
        let loaded = EngineState::load(&db).await.unwrap();
        assert_eq!(loaded.session_counters.get(&day), Some(&1));
        assert!(loaded.updated_at.is_some());
    }

    #[tokio::test]
    async fn rejects_garbage_and_future_schemas() {
        let db = MemoryDatastore::new();
        db.seed_table(STATE_TABLE, vec![vec![Cell::from("{oops")]]).await.unwrap();
        assert!(EngineState::load(&db).await.is_err());
        db.seed_table(STATE_TABLE, vec![vec![Cell::from(r#"{"schema_version": 99}"#)]]).await.unwrap();
        assert!(EngineState::load(&db).await.is_err());
        db.seed_table(STATE_TABLE, vec![vec![Cell::from(r#"{"schema_version": 0}"#)]]).await.unwrap();
        assert_eq!(EngineState::load(&db).await.unwrap().schema_version, ENGINE_STATE_SCHEMA_VERSION);
    }
}
