use std::env;

use log::*;
use point_ledger_engine::SqliteDatastore;
use sqlx::{migrate::MigrateDatabase, Sqlite};

/// Loads `.env.test`, initialises logging and creates a fresh database at `url` with the schema applied.
pub async fn prepare_test_env(url: &str) -> SqliteDatastore {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    debug!("🚀 Logging initialised");
    create_database(url).await;
    let db = SqliteDatastore::new_with_url(url, 5).await.expect("Error creating connection to database");
    db.run_migrations().await.expect("Error running DB migrations");
    db
}

pub fn random_db_path() -> String {
    let dir = env::temp_dir();
    format!("sqlite://{}/ledger_test_{}.db", dir.display(), rand::random::<u64>())
}

async fn create_database(url: &str) {
    if Sqlite::database_exists(url).await.unwrap_or(false) {
        Sqlite::drop_database(url).await.expect("Error dropping database");
    }
    Sqlite::create_database(url).await.expect("Error creating database");
    info!("🚀 Created test database at {url}");
}

pub async fn tear_down(db: &SqliteDatastore) {
    db.close().await;
    let url = point_ledger_engine::traits::TabularDatastore::url(db).to_string();
    if let Err(e) = Sqlite::drop_database(&url).await {
        error!("🚀 Failed to drop test database {url}: {e}");
    }
}
