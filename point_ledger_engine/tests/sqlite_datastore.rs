use ledger_common::Points;
use point_ledger_engine::{
    db_types::{Cell, MemberKey},
    events::EventProducers,
    sheets::{header, LEDGER_HEADER, LEDGER_TABLE},
    traits::{CellRange, DatastoreError, TabularDatastore},
    BossRegistry,
    EngineConfig,
    LedgerApi,
};

use crate::support::prepare_env::{prepare_test_env, random_db_path, tear_down};

mod support;

#[tokio::test]
async fn tables_are_created_once_and_listed_in_order() {
    let db = prepare_test_env(&random_db_path()).await;
    assert!(db.ensure_table("Beta", &[Cell::from("B")]).await.unwrap());
    assert!(db.ensure_table("Alpha", &[Cell::from("A")]).await.unwrap());
    assert!(!db.ensure_table("Beta", &[Cell::from("changed")]).await.unwrap());
    assert_eq!(db.table_names().await.unwrap(), vec!["Beta".to_string(), "Alpha".to_string()]);
    assert_eq!(db.read_table("Beta").await.unwrap(), vec![vec![Cell::from("B")]]);
    assert!(matches!(db.ensure_table("bad name", &[]).await, Err(DatastoreError::InvalidTableName(_))));
    assert!(matches!(db.read_table("Missing").await, Err(DatastoreError::TableNotFound(_))));
    tear_down(&db).await;
}

#[tokio::test]
async fn ranges_round_trip_every_cell_type() {
    let db = prepare_test_env(&random_db_path()).await;
    db.ensure_table("T", &[Cell::from("a"), Cell::from("b")]).await.unwrap();
    let values = vec![vec![Cell::Int(-4), Cell::Bool(true)], vec![Cell::Empty, Cell::from("x")]];
    db.write_range("T", 2, 1, values).await.unwrap();
    let rows = db.read_table("T").await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows[1].is_empty());
    assert_eq!(rows[2], vec![Cell::Empty, Cell::Int(-4), Cell::Bool(true)]);
    assert_eq!(rows[3], vec![Cell::Empty, Cell::Empty, Cell::from("x")]);
    let block = db.read_range("T", CellRange::new(0, 1, 3, 3)).await.unwrap();
    assert_eq!(block, vec![
        vec![Cell::from("b"), Cell::Empty, Cell::Empty],
        vec![Cell::Empty, Cell::Empty, Cell::Empty],
        vec![Cell::Int(-4), Cell::Bool(true), Cell::Empty],
    ]);
    tear_down(&db).await;
}

#[tokio::test]
async fn append_and_delete_shift_rows() {
    let db = prepare_test_env(&random_db_path()).await;
    db.ensure_table("T", &[Cell::from("h")]).await.unwrap();
    for name in ["r1", "r2", "r3"] {
        db.append_row("T", vec![Cell::from(name)]).await.unwrap();
    }
    assert_eq!(db.append_row("T", vec![]).await.unwrap(), 4);
    db.delete_row("T", 2).await.unwrap();
    let rows = db.read_table("T").await.unwrap();
    let col0 = rows.iter().map(|r| r.first().cloned().unwrap_or_default()).collect::<Vec<_>>();
    assert_eq!(col0, vec![Cell::from("h"), Cell::from("r1"), Cell::from("r3"), Cell::Empty]);
    assert!(matches!(db.delete_row("T", 9).await, Err(DatastoreError::RowOutOfRange { row: 9, .. })));
    assert_eq!(db.append_row("T", vec![Cell::from("r4")]).await.unwrap(), 4);
    tear_down(&db).await;
}

#[tokio::test]
async fn the_engine_runs_on_sqlite() {
    let db = prepare_test_env(&random_db_path()).await;
    db.ensure_table(LEDGER_TABLE, &header(&LEDGER_HEADER)).await.unwrap();
    db.append_row(LEDGER_TABLE, vec![Cell::from("Alice Smith")]).await.unwrap();
    let bosses = BossRegistry::default().with_boss("Venatus", Points::from(1), &[]);
    let api = LedgerApi::new(db.clone(), EngineConfig::default().with_bosses(bosses), EventProducers::default());
    let attendance = point_ledger_engine::AttendanceApi::new(api.clone());
    for ts in ["10/06/25 09:00", "10/07/25 09:00", "10/08/25 09:00"] {
        attendance.submit_attendance("Venatus", ts, &["Alice Smith"]).await.unwrap();
    }
    let view = api.get_ledger(true).await.unwrap();
    let alice = MemberKey::from_display("alicesmith").unwrap();
    assert_eq!(view.snapshot.points_left(&alice), Some(Points::from(3)));
    let cached = api.get_ledger(false).await.unwrap();
    assert!(cached.from_cache);
    tear_down(&db).await;
}
