use std::{env, fmt::Display, str::FromStr, time::Duration};

use chrono::FixedOffset;
use ledger_common::parse_boolean_flag;
use log::*;

use crate::{
    boss_registry::BossRegistry,
    normalize::{timezone_from_minutes, DEFAULT_TZ_OFFSET_MINUTES},
};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/ledger.db";
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.70;
pub const DEFAULT_RECONCILE_RETRIES: u32 = 3;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database_url: String,
    /// The longest any operation will wait for the ledger lock before failing with a lock timeout.
    pub lock_timeout: Duration,
    /// The minimum interval between two reactive recomputations of the same target.
    pub debounce_window: Duration,
    pub cache_ttl: Duration,
    /// The zone in which timestamps are normalized and session days are counted.
    pub timezone: FixedOffset,
    /// Minimum similarity for a fuzzy catalog match to be accepted.
    pub fuzzy_threshold: f64,
    /// How many times a reconciliation pass is attempted before giving up.
    pub reconcile_retries: u32,
    /// If true, `settle_item` archives a sold item straight away rather than leaving it for `archive_settled`.
    pub archive_on_settle: bool,
    pub bosses: BossRegistry,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            cache_ttl: DEFAULT_CACHE_TTL,
            timezone: timezone_from_minutes(DEFAULT_TZ_OFFSET_MINUTES),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            reconcile_retries: DEFAULT_RECONCILE_RETRIES,
            archive_on_settle: false,
            bosses: BossRegistry::default(),
        }
    }
}

fn env_or_default<T: FromStr + Display>(key: &str, default: T) -> T
where T::Err: Display {
    match env::var(key) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {key}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => default,
    }
}

impl EngineConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("LEDGER_DATABASE_URL").ok().unwrap_or_else(|| {
            info!("🪛️ LEDGER_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let lock_timeout = Duration::from_millis(env_or_default(
            "LEDGER_LOCK_TIMEOUT_MS",
            u64::try_from(DEFAULT_LOCK_TIMEOUT.as_millis()).unwrap_or(30_000),
        ));
        let debounce_window = Duration::from_millis(env_or_default(
            "LEDGER_DEBOUNCE_MS",
            u64::try_from(DEFAULT_DEBOUNCE_WINDOW.as_millis()).unwrap_or(5_000),
        ));
        let cache_ttl = Duration::from_secs(env_or_default("LEDGER_CACHE_TTL_SECS", DEFAULT_CACHE_TTL.as_secs()));
        let timezone = timezone_from_minutes(env_or_default("LEDGER_TZ_OFFSET_MINUTES", DEFAULT_TZ_OFFSET_MINUTES));
        let mut fuzzy_threshold = env_or_default("LEDGER_FUZZY_THRESHOLD", DEFAULT_FUZZY_THRESHOLD);
        if !(0.0..=1.0).contains(&fuzzy_threshold) {
            warn!("🪛️ LEDGER_FUZZY_THRESHOLD must be between 0 and 1. Using the default, {DEFAULT_FUZZY_THRESHOLD}.");
            fuzzy_threshold = DEFAULT_FUZZY_THRESHOLD;
        }
        let reconcile_retries = env_or_default("LEDGER_RECONCILE_RETRIES", DEFAULT_RECONCILE_RETRIES).max(1);
        let archive_on_settle = parse_boolean_flag(env::var("LEDGER_ARCHIVE_ON_SETTLE").ok(), false);
        let bosses = match env::var("LEDGER_BOSS_POINTS_FILE") {
            Ok(path) => BossRegistry::from_file(&path).unwrap_or_else(|e| {
                warn!("🪛️ Could not load the boss registry from {path}. {e}. Every boss will be worth 1 point.");
                BossRegistry::default()
            }),
            Err(_) => {
                info!("🪛️ LEDGER_BOSS_POINTS_FILE is not set. Every boss will be worth 1 point.");
                BossRegistry::default()
            },
        };
        Self {
            database_url,
            lock_timeout,
            debounce_window,
            cache_ttl,
            timezone,
            fuzzy_threshold,
            reconcile_retries,
            archive_on_settle,
            bosses,
        }
    }

    pub fn with_bosses(mut self, bosses: BossRegistry) -> Self {
        self.bosses = bosses;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_archive_on_settle(mut self, archive: bool) -> Self {
        self.archive_on_settle = archive;
        self
    }

    pub fn with_reconcile_retries(mut self, retries: u32) -> Self {
        self.reconcile_retries = retries.max(1);
        self
    }
}
