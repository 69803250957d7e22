use std::fmt::Debug;

use cucumber::World;
use ledger_common::Points;
use point_ledger_engine::{
    catalog::CatalogMatch,
    events::EventProducers,
    gate::ManualOperation,
    ledger_api::{EditOutcome, LedgerView},
    AttendanceApi,
    AuctionApi,
    BossRegistry,
    EngineConfig,
    LedgerApi,
    LedgerError,
    SqliteDatastore,
};

use crate::support::prepare_env::{prepare_test_env, random_db_path};

#[derive(Default, Debug, World)]
pub struct LedgerWorld {
    pub system: Option<TestSystem>,
    pub bosses: Vec<(String, Points)>,
}

impl LedgerWorld {
    pub async fn start(&mut self) {
        let bosses = self
            .bosses
            .iter()
            .fold(BossRegistry::default(), |registry, (name, points)| registry.with_boss(name.as_str(), *points, &[]));
        let config = EngineConfig::default().with_bosses(bosses);
        self.system = Some(TestSystem::new(config).await);
    }

    pub fn system(&mut self) -> &mut TestSystem {
        self.system.as_mut().expect("The ledger has not been set up")
    }
}

pub struct TestSystem {
    pub db_path: String,
    pub ledger: LedgerApi<SqliteDatastore>,
    pub attendance: AttendanceApi<SqliteDatastore>,
    pub auctions: AuctionApi<SqliteDatastore>,
    pub manual_operation: Option<ManualOperation>,
    pub last_view: Option<LedgerView>,
    pub last_edit: Option<EditOutcome>,
    pub last_match: Option<CatalogMatch>,
    pub last_error: Option<LedgerError>,
}

impl Debug for TestSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestSystem ({})", self.db_path)
    }
}

impl TestSystem {
    pub async fn new(config: EngineConfig) -> Self {
        let db_path = random_db_path();
        let db = prepare_test_env(&db_path).await;
        let ledger = LedgerApi::new(db, config, EventProducers::default());
        ledger.initialize().await.expect("Error initialising the ledger tables");
        let attendance = AttendanceApi::new(ledger.clone());
        let auctions = AuctionApi::new(ledger.clone());
        Self {
            db_path,
            ledger,
            attendance,
            auctions,
            manual_operation: None,
            last_view: None,
            last_edit: None,
            last_match: None,
            last_error: None,
        }
    }
}
