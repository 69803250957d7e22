//! An in-memory [`TabularDatastore`]. Used for tests and for embedding the engine where durability comes from
//! elsewhere.
use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use log::*;
use tokio::sync::RwLock;

use crate::{
    db_types::{put_cell, Cell, Row},
    traits::{validate_table_name, CellRange, DatastoreError, TabularDatastore},
};

#[derive(Default)]
struct Tables {
    order: Vec<String>,
    data: HashMap<String, Vec<Row>>,
}

#[derive(Clone, Default)]
pub struct MemoryDatastore {
    tables: Arc<RwLock<Tables>>,
    failing_writes: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl Debug for MemoryDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryDatastore ({} writes)", self.writes.load(Ordering::SeqCst))
    }
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) a table with the given rows. The first row is the header.
    pub async fn seed_table(&self, name: &str, rows: Vec<Row>) -> Result<(), DatastoreError> {
        validate_table_name(name)?;
        let mut tables = self.tables.write().await;
        if !tables.data.contains_key(name) {
            tables.order.push(name.to_string());
        }
        tables.data.insert(name.to_string(), rows);
        Ok(())
    }

    /// The next `count` range writes will fail with [`DatastoreError::WriteRejected`] after writing their first row.
    /// Reads, appends and deletions are unaffected.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// The number of successful range writes, appends and deletions so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_write_failure(&self) -> bool {
        self.failing_writes.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> Result<&'a mut Vec<Row>, DatastoreError> {
    tables.data.get_mut(name).ok_or_else(|| DatastoreError::TableNotFound(name.to_string()))
}

impl TabularDatastore for MemoryDatastore {
    fn url(&self) -> &str {
        "memory://"
    }

    async fn table_names(&self) -> Result<Vec<String>, DatastoreError> {
        Ok(self.tables.read().await.order.clone())
    }

    async fn ensure_table(&self, name: &str, header: &[Cell]) -> Result<bool, DatastoreError> {
        validate_table_name(name)?;
        let mut tables = self.tables.write().await;
        if tables.data.contains_key(name) {
            return Ok(false);
        }
        tables.order.push(name.to_string());
        let rows = if header.is_empty() { Vec::new() } else { vec![header.to_vec()] };
        tables.data.insert(name.to_string(), rows);
        debug!("🗃️ Created table {name}");
        Ok(true)
    }

    async fn read_table(&self, name: &str) -> Result<Vec<Row>, DatastoreError> {
        let tables = self.tables.read().await;
        tables.data.get(name).cloned().ok_or_else(|| DatastoreError::TableNotFound(name.to_string()))
    }

    async fn read_range(&self, name: &str, range: CellRange) -> Result<Vec<Row>, DatastoreError> {
        let tables = self.tables.read().await;
        let rows = tables.data.get(name).ok_or_else(|| DatastoreError::TableNotFound(name.to_string()))?;
        let result = (range.row..range.row + range.rows)
            .map(|r| {
                (range.col..range.col + range.cols)
                    .map(|c| rows.get(r).and_then(|row| row.get(c)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        Ok(result)
    }

    async fn write_range(&self, name: &str, row: usize, col: usize, values: Vec<Row>) -> Result<(), DatastoreError> {
        let fail = self.take_write_failure();
        let mut tables = self.tables.write().await;
        let rows = table_mut(&mut tables, name)?;
        for (i, values_row) in values.into_iter().enumerate() {
            if fail && i > 0 {
                warn!("🗃️ Simulated write failure on {name} after {i} rows");
                return Err(DatastoreError::WriteRejected(format!("simulated failure writing {name}")));
            }
            for (j, value) in values_row.into_iter().enumerate() {
                put_cell(rows, row + i, col + j, value);
            }
        }
        if fail {
            return Err(DatastoreError::WriteRejected(format!("simulated failure writing {name}")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn append_row(&self, name: &str, row: Row) -> Result<usize, DatastoreError> {
        let mut tables = self.tables.write().await;
        let rows = table_mut(&mut tables, name)?;
        rows.push(row);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(rows.len() - 1)
    }

    async fn delete_row(&self, name: &str, row: usize) -> Result<(), DatastoreError> {
        let mut tables = self.tables.write().await;
        let rows = table_mut(&mut tables, name)?;
        if row >= rows.len() {
            return Err(DatastoreError::RowOutOfRange { table: name.to_string(), row });
        }
        rows.remove(row);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn texts(values: &[&str]) -> Row {
        values.iter().map(|v| Cell::from(*v)).collect()
    }

    #[tokio::test]
    async fn tables_and_ranges() {
        let db = MemoryDatastore::new();
        assert!(db.ensure_table("Sheet1", &texts(&["a", "b"])).await.unwrap());
        assert!(!db.ensure_table("Sheet1", &texts(&["x"])).await.unwrap());
        assert!(db.ensure_table("bad name", &[]).await.is_err());
        db.write_range("Sheet1", 2, 1, vec![vec![Cell::Int(1), Cell::Int(2)]]).await.unwrap();
        let rows = db.read_table("Sheet1").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], Vec::<Cell>::new());
        assert_eq!(rows[2], vec![Cell::Empty, Cell::Int(1), Cell::Int(2)]);
        let block = db.read_range("Sheet1", CellRange::new(0, 1, 2, 2)).await.unwrap();
        assert_eq!(block, vec![vec![Cell::from("b"), Cell::Empty], vec![Cell::Empty, Cell::Empty]]);
        assert_eq!(db.table_names().await.unwrap(), vec!["Sheet1".to_string()]);
    }

    #[tokio::test]
    async fn append_and_delete() {
        let db = MemoryDatastore::new();
        db.ensure_table("T", &texts(&["h"])).await.unwrap();
        assert_eq!(db.append_row("T", texts(&["one"])).await.unwrap(), 1);
        assert_eq!(db.append_row("T", texts(&["two"])).await.unwrap(), 2);
        db.delete_row("T", 1).await.unwrap();
        assert_eq!(db.read_table("T").await.unwrap(), vec![texts(&["h"]), texts(&["two"])]);
        assert!(matches!(db.delete_row("T", 5).await, Err(DatastoreError::RowOutOfRange { .. })));
        assert!(matches!(db.read_table("Nope").await, Err(DatastoreError::TableNotFound(_))));
    }

    #[tokio::test]
    async fn simulated_failures_leave_partial_writes() {
        let db = MemoryDatastore::new();
        db.ensure_table("T", &[]).await.unwrap();
        db.fail_next_writes(1);
        let values = vec![vec![Cell::Int(1)], vec![Cell::Int(2)]];
        assert!(db.write_range("T", 0, 0, values.clone()).await.is_err());
        assert_eq!(db.read_table("T").await.unwrap(), vec![vec![Cell::Int(1)]]);
        db.write_range("T", 0, 0, values).await.unwrap();
        assert_eq!(db.read_table("T").await.unwrap().len(), 2);
    }
}
