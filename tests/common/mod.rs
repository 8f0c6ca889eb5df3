//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use crashline::{
    config::{GameConfig, PriceConfig},
    events::EventBroadcaster,
    game_store::GameStore,
    games::{types::Currency, BetCashoutCoordinator, RoundLifecycleManager, RoundTable},
    metrics::EngineMetrics,
    prices::{PriceCache, PriceFetchError, PriceSource},
};
use std::sync::Arc;

pub const FIRST_ROUND_ID: u64 = 1_700_000_000_000;

/// Crash points of the first rounds under the default seed
pub const FIRST_CRASH_POINT: f64 = 2.85;
pub const SECOND_CRASH_POINT: f64 = 3.37;

pub fn fixed_round_clock() -> u64 {
    FIRST_ROUND_ID
}

/// Source that always answers with the same prices
pub struct FixedPriceSource {
    pub btc: f64,
    pub eth: f64,
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_usd_price(&self, currency: Currency) -> Result<f64, PriceFetchError> {
        Ok(match currency {
            Currency::Btc => self.btc,
            Currency::Eth => self.eth,
        })
    }
}

/// Price cache primed with BTC at 50 000 and ETH at 2 500
pub async fn primed_prices() -> Arc<PriceCache> {
    let cache = PriceCache::new(
        Arc::new(FixedPriceSource {
            btc: 50_000.0,
            eth: 2_500.0,
        }),
        &PriceConfig::default(),
    );
    cache.refresh_all().await;
    Arc::new(cache)
}

pub struct Harness {
    pub table: Arc<RoundTable>,
    pub events: EventBroadcaster,
    pub metrics: Arc<EngineMetrics>,
    pub coordinator: Arc<BetCashoutCoordinator>,
    pub engine: Arc<RoundLifecycleManager>,
}

pub async fn harness(store: Arc<dyn GameStore>) -> Harness {
    let table = Arc::new(RoundTable::new());
    let events = EventBroadcaster::default();
    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let config = GameConfig::default();

    let coordinator = Arc::new(
        BetCashoutCoordinator::new(
            table.clone(),
            store.clone(),
            primed_prices().await,
            events.clone(),
            config.starting_balance,
        )
        .with_metrics(metrics.clone()),
    );
    let engine = Arc::new(
        RoundLifecycleManager::new(table.clone(), store, events.clone(), &config)
            .with_metrics(metrics.clone())
            .with_round_clock(fixed_round_clock),
    );

    Harness {
        table,
        events,
        metrics,
        coordinator,
        engine,
    }
}
