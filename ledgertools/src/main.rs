use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ledger_common::Points;
use log::*;
use point_ledger_engine::{
    db_types::NewAuctionItem,
    events::EventProducers,
    sheets::{item_from_row, ITEMS_TABLE},
    traits::TabularDatastore,
    AttendanceApi,
    AuctionApi,
    EngineConfig,
    LedgerApi,
    SqliteDatastore,
};

mod formatting;
mod setup;

use crate::{
    formatting::{
        format_attendance_result,
        format_balances,
        format_items,
        format_ledger_view,
        format_match,
        format_reconcile_result,
        format_removed_member,
        format_totals,
        format_warnings,
    },
    setup::{init_datastore, InitParams},
};

/// Operator tools for the point ledger. The datastore location is read from `LEDGER_DATABASE_URL`.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database, run the migrations and create the engine tables.
    #[clap(name = "init")]
    Init(InitParams),
    #[command(flatten)]
    Engine(EngineCommand),
}

/// Commands that drive the engine against an initialised datastore.
#[derive(Debug, Subcommand)]
pub enum EngineCommand {
    /// Recompute every member's balance from attendance and auction spend.
    #[clap(name = "reconcile")]
    Reconcile,
    /// Rebuild the attendance totals table.
    #[clap(name = "totals")]
    Totals,
    /// Print the point ledger.
    #[clap(name = "ledger")]
    Ledger {
        /// Bypass the cache
        #[arg(short, long)]
        fresh: bool,
    },
    /// Match an item label against the catalog of previously auctioned items.
    #[clap(name = "match")]
    Match { label: String },
    #[clap(name = "attend", about = "Record the members that attended a boss spawn")]
    Attend(AttendParams),
    #[clap(name = "add-member")]
    AddMember { name: String },
    /// Remove a member from the ledger, the totals and every attendance table.
    #[clap(name = "remove-member")]
    RemoveMember { name: String },
    #[clap(name = "list", about = "List an item for the next auction session")]
    List(ListParams),
    /// Print the working items table.
    #[clap(name = "items")]
    Items,
    /// Move sold items to the archive.
    #[clap(name = "archive")]
    Archive,
}

#[derive(Debug, Args)]
pub struct AttendParams {
    /// The boss name or alias
    #[arg(short, long)]
    boss: String,
    /// When the boss spawned. Most common date formats are accepted.
    #[arg(short = 't', long = "at")]
    timestamp: String,
    /// The members that attended
    #[arg(required = true)]
    members: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ListParams {
    label: String,
    /// The starting price. Taken from the catalog if omitted.
    #[arg(short, long)]
    price: Option<i64>,
    #[arg(short, long, default_value = "1")]
    quantity: u32,
    /// Auction duration, in minutes
    #[arg(short, long, default_value = "30")]
    duration: u32,
    /// The boss that dropped the item
    #[arg(short, long)]
    boss: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    let cli = Arguments::parse();
    let result = match cli.command {
        Command::Init(params) => init_datastore(params).await,
        Command::Engine(command) => run(command).await,
    };
    if let Err(e) = result {
        error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn connect() -> Result<LedgerApi<SqliteDatastore>> {
    let config = EngineConfig::from_env_or_default();
    let db = SqliteDatastore::new_with_url(&config.database_url, 5).await?;
    Ok(LedgerApi::new(db, config, EventProducers::default()))
}

async fn run(command: EngineCommand) -> Result<()> {
    let ledger = connect().await?;
    match command {
        EngineCommand::Reconcile => {
            let result = ledger.reconcile_ledger().await?;
            print!("{}", format_reconcile_result(&result)?);
        },
        EngineCommand::Totals => {
            let result = ledger.reconcile_attendance_totals().await?;
            println!("{}", format_totals(&result.totals));
            print!("{}", format_warnings(&result.warnings));
        },
        EngineCommand::Ledger { fresh } => {
            let view = ledger.get_ledger(fresh).await?;
            print!("{}", format_ledger_view(&view)?);
        },
        EngineCommand::Match { label } => {
            let m = AuctionApi::new(ledger).match_catalog(&label).await?;
            print!("{}", format_match(&m)?);
        },
        EngineCommand::Attend(params) => {
            let members = params.members.iter().map(String::as_str).collect::<Vec<_>>();
            let result = AttendanceApi::new(ledger).submit_attendance(&params.boss, &params.timestamp, &members).await?;
            print!("{}", format_attendance_result(&result)?);
        },
        EngineCommand::AddMember { name } => {
            let balance = ledger.add_member(&name).await?;
            println!("{}", format_balances(&[balance]));
        },
        EngineCommand::RemoveMember { name } => {
            let removed = ledger.remove_member(&name).await?;
            print!("{}", format_removed_member(&removed)?);
        },
        EngineCommand::List(params) => {
            let mut item =
                NewAuctionItem::new(params.label).with_quantity(params.quantity).with_duration(params.duration);
            if let Some(price) = params.price {
                item = item.with_start_price(Points::from(price));
            }
            if let Some(boss) = params.boss {
                item = item.with_boss(boss);
            }
            let listing = AuctionApi::new(ledger).list_item(item).await?;
            println!("{}", format_items(&[listing.item]));
            print!("{}", format_warnings(&listing.warnings));
        },
        EngineCommand::Items => {
            let rows = ledger.db().read_table(ITEMS_TABLE).await?;
            let items = rows.iter().skip(1).filter_map(|r| item_from_row(r)).collect::<Vec<_>>();
            println!("{}", format_items(&items));
        },
        EngineCommand::Archive => {
            let result = AuctionApi::new(ledger).archive_settled().await?;
            println!("Archived {} items", result.archived.len());
            for id in result.archived {
                println!("  {id}");
            }
        },
    }
    Ok(())
}
