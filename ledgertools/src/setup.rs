use std::path::Path;

use anyhow::Result;
use clap::Args;
use point_ledger_engine::{events::EventProducers, sqlite::db::db_url, EngineConfig, LedgerApi, SqliteDatastore};
use sqlx::{
    migrate::{MigrateDatabase, Migrator},
    Sqlite,
};

#[derive(Debug, Args)]
pub struct InitParams {
    /// The path to a migrations directory. The migrations are embedded in the binary by default, and so this
    /// parameter is optional. If provided, the migrations at <path> will be executed instead.
    #[arg(short, long)]
    pub path: Option<String>,
}

/// Creates the database if needed, applies the migrations and creates any missing engine tables.
pub async fn init_datastore(params: InitParams) -> Result<()> {
    create_database_if_not_exist().await?;
    let db = SqliteDatastore::new(1).await?;
    match &params.path {
        Some(path) => {
            println!("Running migrations at: {path}");
            let migrator = Migrator::new(Path::new(path)).await?;
            migrator.run(db.pool()).await?;
        },
        None => {
            println!("Running embedded migrations");
            db.run_migrations().await?;
        },
    }
    let api = LedgerApi::new(db, EngineConfig::from_env_or_default(), EventProducers::default());
    api.initialize().await?;
    println!("Datastore ready");
    Ok(())
}

async fn create_database_if_not_exist() -> Result<()> {
    let db = db_url();
    if !Sqlite::database_exists(&db).await? {
        println!("Creating new database at: {db}");
        Sqlite::create_database(&db).await?;
    }
    Ok(())
}
