use sqlx::SqliteConnection;

use crate::{
    db_types::{put_cell, Cell, Row},
    traits::{CellRange, DatastoreError},
};

fn to_db(index: usize) -> Result<i64, DatastoreError> {
    i64::try_from(index).map_err(|_| DatastoreError::DatabaseError(format!("Index {index} is out of range")))
}

fn from_db(index: i64) -> Result<usize, DatastoreError> {
    usize::try_from(index).map_err(|_| DatastoreError::CorruptCell(format!("Negative cell index {index}")))
}

pub async fn table_exists(name: &str, conn: &mut SqliteConnection) -> Result<bool, DatastoreError> {
    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sheet_tables WHERE name = $1")
        .bind(name)
        .fetch_one(conn)
        .await?;
    Ok(found > 0)
}

pub async fn expect_table(name: &str, conn: &mut SqliteConnection) -> Result<(), DatastoreError> {
    if table_exists(name, conn).await? {
        Ok(())
    } else {
        Err(DatastoreError::TableNotFound(name.to_string()))
    }
}

pub async fn table_names(conn: &mut SqliteConnection) -> Result<Vec<String>, DatastoreError> {
    let names = sqlx::query_scalar::<_, String>("SELECT name FROM sheet_tables ORDER BY position")
        .fetch_all(conn)
        .await?;
    Ok(names)
}

/// Registers the table. Returns `false` if it already existed.
pub async fn create_table(name: &str, conn: &mut SqliteConnection) -> Result<bool, DatastoreError> {
    let result = sqlx::query(
        r#"INSERT OR IGNORE INTO sheet_tables (name, position)
        VALUES ($1, (SELECT COALESCE(MAX(position), 0) + 1 FROM sheet_tables))"#,
    )
    .bind(name)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn upsert_cell(
    name: &str,
    row: usize,
    col: usize,
    value: &Cell,
    conn: &mut SqliteConnection,
) -> Result<(), DatastoreError> {
    let json = serde_json::to_string(value)?;
    sqlx::query(
        r#"INSERT INTO sheet_cells (table_name, row_idx, col_idx, value) VALUES ($1, $2, $3, $4)
        ON CONFLICT (table_name, row_idx, col_idx) DO UPDATE SET value = excluded.value"#,
    )
    .bind(name)
    .bind(to_db(row)?)
    .bind(to_db(col)?)
    .bind(json)
    .execute(conn)
    .await?;
    Ok(())
}

/// Writes a block of rows with its top-left cell at `(row, col)`.
pub async fn upsert_rows(
    name: &str,
    row: usize,
    col: usize,
    values: &[Row],
    conn: &mut SqliteConnection,
) -> Result<(), DatastoreError> {
    for (i, values_row) in values.iter().enumerate() {
        for (j, value) in values_row.iter().enumerate() {
            upsert_cell(name, row + i, col + j, value, conn).await?;
        }
    }
    Ok(())
}

/// The index of the last row holding any cell, if there is one.
pub async fn last_row(name: &str, conn: &mut SqliteConnection) -> Result<Option<usize>, DatastoreError> {
    let last = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(row_idx) FROM sheet_cells WHERE table_name = $1")
        .bind(name)
        .fetch_one(conn)
        .await?;
    last.map(from_db).transpose()
}

pub async fn fetch_rows(name: &str, conn: &mut SqliteConnection) -> Result<Vec<Row>, DatastoreError> {
    let cells = sqlx::query_as::<_, (i64, i64, String)>(
        "SELECT row_idx, col_idx, value FROM sheet_cells WHERE table_name = $1 ORDER BY row_idx, col_idx",
    )
    .bind(name)
    .fetch_all(conn)
    .await?;
    let mut rows = Vec::new();
    for (r, c, value) in cells {
        let cell: Cell = serde_json::from_str(&value)?;
        put_cell(&mut rows, from_db(r)?, from_db(c)?, cell);
    }
    Ok(rows)
}

pub async fn fetch_range(
    name: &str,
    range: CellRange,
    conn: &mut SqliteConnection,
) -> Result<Vec<Row>, DatastoreError> {
    let cells = sqlx::query_as::<_, (i64, i64, String)>(
        r#"SELECT row_idx, col_idx, value FROM sheet_cells
        WHERE table_name = $1 AND row_idx >= $2 AND row_idx < $3 AND col_idx >= $4 AND col_idx < $5"#,
    )
    .bind(name)
    .bind(to_db(range.row)?)
    .bind(to_db(range.row + range.rows)?)
    .bind(to_db(range.col)?)
    .bind(to_db(range.col + range.cols)?)
    .fetch_all(conn)
    .await?;
    let mut block = vec![vec![Cell::Empty; range.cols]; range.rows];
    for (r, c, value) in cells {
        let cell: Cell = serde_json::from_str(&value)?;
        block[from_db(r)? - range.row][from_db(c)? - range.col] = cell;
    }
    Ok(block)
}

/// Removes a row and moves every row below it up by one.
///
/// The shift goes through negative indices so that no intermediate state violates the primary key.
pub async fn delete_row(name: &str, row: usize, conn: &mut SqliteConnection) -> Result<(), DatastoreError> {
    let row = to_db(row)?;
    sqlx::query("DELETE FROM sheet_cells WHERE table_name = $1 AND row_idx = $2")
        .bind(name)
        .bind(row)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE sheet_cells SET row_idx = -row_idx WHERE table_name = $1 AND row_idx > $2")
        .bind(name)
        .bind(row)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE sheet_cells SET row_idx = -row_idx - 1 WHERE table_name = $1 AND row_idx < 0")
        .bind(name)
        .execute(conn)
        .await?;
    Ok(())
}
