//! `SqliteDatastore` is the durable implementation of the [`TabularDatastore`] contract.
//!
//! Every table lives in one `sheet_cells` relation keyed by `(table, row, col)`. Each trait call runs in its own
//! transaction, which is as far as the engine's guarantees go: the engine itself never relies on transactions spanning
//! calls.
use std::fmt::Debug;

use log::*;
use sqlx::SqlitePool;

use super::db::{cells, db_url, new_pool};
use crate::{
    db_types::{Cell, Row},
    traits::{validate_table_name, CellRange, DatastoreError, TabularDatastore},
};

#[derive(Clone)]
pub struct SqliteDatastore {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatastore ({:?})", self.pool)
    }
}

impl SqliteDatastore {
    /// Creates a new datastore instance using the URL in `LEDGER_DATABASE_URL`, or the default location.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatastore::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        trace!("🗃️ Created new SQLite pool for {url}");
        Ok(Self { url: url.to_string(), pool })
    }

    /// Applies the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        debug!("🗃️ Migrations applied to {}", self.url);
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl TabularDatastore for SqliteDatastore {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn table_names(&self) -> Result<Vec<String>, DatastoreError> {
        let mut conn = self.pool.acquire().await?;
        cells::table_names(&mut conn).await
    }

    async fn ensure_table(&self, name: &str, header: &[Cell]) -> Result<bool, DatastoreError> {
        validate_table_name(name)?;
        let mut tx = self.pool.begin().await?;
        let created = cells::create_table(name, &mut tx).await?;
        if created {
            cells::upsert_rows(name, 0, 0, &[header.to_vec()], &mut tx).await?;
        }
        tx.commit().await?;
        if created {
            debug!("🗃️ Created table {name}");
        }
        Ok(created)
    }

    async fn read_table(&self, name: &str) -> Result<Vec<Row>, DatastoreError> {
        let mut conn = self.pool.acquire().await?;
        cells::expect_table(name, &mut conn).await?;
        cells::fetch_rows(name, &mut conn).await
    }

    async fn read_range(&self, name: &str, range: CellRange) -> Result<Vec<Row>, DatastoreError> {
        let mut conn = self.pool.acquire().await?;
        cells::expect_table(name, &mut conn).await?;
        cells::fetch_range(name, range, &mut conn).await
    }

    async fn write_range(&self, name: &str, row: usize, col: usize, values: Vec<Row>) -> Result<(), DatastoreError> {
        let mut tx = self.pool.begin().await?;
        cells::expect_table(name, &mut tx).await?;
        cells::upsert_rows(name, row, col, &values, &mut tx).await?;
        tx.commit().await?;
        trace!("🗃️ Wrote {} rows to {name} at ({row}, {col})", values.len());
        Ok(())
    }

    async fn append_row(&self, name: &str, row: Row) -> Result<usize, DatastoreError> {
        let mut tx = self.pool.begin().await?;
        cells::expect_table(name, &mut tx).await?;
        let index = cells::last_row(name, &mut tx).await?.map(|r| r + 1).unwrap_or(0);
        // An empty row still has to claim its index
        let row = if row.is_empty() { vec![Cell::Empty] } else { row };
        cells::upsert_rows(name, index, 0, &[row], &mut tx).await?;
        tx.commit().await?;
        trace!("🗃️ Appended row {index} to {name}");
        Ok(index)
    }

    async fn delete_row(&self, name: &str, row: usize) -> Result<(), DatastoreError> {
        let mut tx = self.pool.begin().await?;
        cells::expect_table(name, &mut tx).await?;
        match cells::last_row(name, &mut tx).await? {
            Some(last) if row <= last => {},
            _ => return Err(DatastoreError::RowOutOfRange { table: name.to_string(), row }),
        }
        cells::delete_row(name, row, &mut tx).await?;
        tx.commit().await?;
        trace!("🗃️ Deleted row {row} from {name}");
        Ok(())
    }
}
