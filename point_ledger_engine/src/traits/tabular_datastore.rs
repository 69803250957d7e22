use thiserror::Error;

use crate::db_types::{Cell, Row};

/// A rectangular block of cells, anchored at `(row, col)`, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl CellRange {
    pub fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self { row, col, rows, cols }
    }

    /// A single column, `rows` cells tall, starting at `(row, col)`.
    pub fn column(row: usize, col: usize, rows: usize) -> Self {
        Self { row, col, rows, cols: 1 }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DatastoreError {
    #[error("We have an internal datastore engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("The table '{0}' does not exist")]
    TableNotFound(String),
    #[error("'{0}' is not a valid table name")]
    InvalidTableName(String),
    #[error("Row {row} does not exist in table '{table}'")]
    RowOutOfRange { table: String, row: usize },
    #[error("The stored cell value could not be decoded. {0}")]
    CorruptCell(String),
    #[error("The write was rejected: {0}")]
    WriteRejected(String),
}

impl From<sqlx::Error> for DatastoreError {
    fn from(e: sqlx::Error) -> Self {
        DatastoreError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for DatastoreError {
    fn from(e: serde_json::Error) -> Self {
        DatastoreError::CorruptCell(e.to_string())
    }
}

/// This trait defines the behaviour of the shared tabular datastore the engine reads from and writes to.
///
/// Rows returned by reads may be ragged: a row only extends as far as its last written cell. Use
/// [`crate::db_types::cell_at`] to read past the end of a row.
///
/// A row "exists" once any cell in it has been written (including an explicit [`Cell::Empty`]). Appends land one row
/// past the last existing row.
#[allow(async_fn_in_trait)]
pub trait TabularDatastore: Clone {
    /// A human-readable description of where the data lives.
    fn url(&self) -> &str;

    /// Every table in the datastore, in creation order.
    async fn table_names(&self) -> Result<Vec<String>, DatastoreError>;

    /// Creates the table with `header` as row 0 if it does not exist yet. Returns `true` if the table was created.
    ///
    /// An existing table is left untouched, even if its header differs.
    async fn ensure_table(&self, name: &str, header: &[Cell]) -> Result<bool, DatastoreError>;

    /// Reads every row of the table.
    async fn read_table(&self, name: &str) -> Result<Vec<Row>, DatastoreError>;

    /// Reads a block of cells. The result always has `range.rows` rows of `range.cols` cells, padded with
    /// [`Cell::Empty`].
    async fn read_range(&self, name: &str, range: CellRange) -> Result<Vec<Row>, DatastoreError>;

    /// Writes `values` with its top-left cell at `(row, col)`. The write is all-or-nothing from the caller's point of
    /// view: if it fails, the caller must assume that any subset of the cells may have been written.
    async fn write_range(&self, name: &str, row: usize, col: usize, values: Vec<Row>) -> Result<(), DatastoreError>;

    /// Appends a row after the last existing row and returns its index.
    async fn append_row(&self, name: &str, row: Row) -> Result<usize, DatastoreError>;

    /// Deletes a row, shifting every row below it up by one.
    async fn delete_row(&self, name: &str, row: usize) -> Result<(), DatastoreError>;
}

/// Table names are used verbatim as identifiers in every backend, so they are limited to ASCII word characters.
pub fn validate_table_name(name: &str) -> Result<(), DatastoreError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Err(DatastoreError::InvalidTableName(name.to_string()))
    } else {
        Ok(())
    }
}
