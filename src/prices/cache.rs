//! Last-good USD price per supported currency
//!
//! Request paths only read the cache. Fetching happens on the background
//! refresher, which keeps the previous quote whenever a fetch fails.

use super::source::{PriceFetchError, PriceSource};
use crate::{
    config::PriceConfig,
    errors::{GameError, GameResult},
    games::types::Currency,
    metrics::EngineMetrics,
};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{interval, sleep, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub fetched_at: Instant,
}

pub struct PriceCache {
    source: Arc<dyn PriceSource>,
    quotes: RwLock<HashMap<Currency, PriceQuote>>,
    ttl: Duration,
    max_retries: u32,
    initial_backoff: Duration,
    metrics: Option<Arc<EngineMetrics>>,
}

impl PriceCache {
    pub fn new(source: Arc<dyn PriceSource>, config: &PriceConfig) -> Self {
        Self {
            source,
            quotes: RwLock::new(HashMap::new()),
            ttl: config.refresh_interval(),
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cached USD price; never contacts the source
    pub fn get_price(&self, currency: Currency) -> GameResult<f64> {
        self.quote(currency)
            .map(|quote| quote.price)
            .ok_or(GameError::PriceUnavailable(currency))
    }

    /// Resolve a user-supplied symbol and read its cached price
    pub fn get_price_for_symbol(&self, symbol: &str) -> GameResult<(Currency, f64)> {
        let currency: Currency = symbol.parse()?;
        Ok((currency, self.get_price(currency)?))
    }

    pub fn quote(&self, currency: Currency) -> Option<PriceQuote> {
        self.quotes
            .read()
            .ok()
            .and_then(|quotes| quotes.get(&currency).copied())
    }

    /// Overwrite the quote for `currency` with a freshly fetched price
    pub fn store_quote(&self, currency: Currency, price: f64) {
        if let Ok(mut quotes) = self.quotes.write() {
            quotes.insert(
                currency,
                PriceQuote {
                    price,
                    fetched_at: Instant::now(),
                },
            );
        }
    }

    /// Fetch from the source, retrying rate-limit responses with doubling
    /// backoff. Any other failure returns immediately.
    pub async fn fetch_with_retry(&self, currency: Currency) -> Result<f64, PriceFetchError> {
        let mut backoff = self.initial_backoff;
        let mut retries = 0;

        loop {
            match self.source.fetch_usd_price(currency).await {
                Ok(price) => return Ok(price),
                Err(e) if e.is_rate_limited() && retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        "{} rate limited fetching {} (retry {}/{}), backing off {:?}",
                        self.source.name(),
                        currency,
                        retries,
                        self.max_retries,
                        backoff
                    );
                    sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Refresh one quote; on failure the previous quote stays in place
    pub async fn refresh(&self, currency: Currency) -> bool {
        match self.fetch_with_retry(currency).await {
            Ok(price) => {
                self.store_quote(currency, price);
                debug!("Updated {} price: ${}", currency, price);
                true
            }
            Err(e) => {
                warn!("Error fetching {} price, keeping last quote: {}", currency, e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_price_failure(currency);
                }
                false
            }
        }
    }

    pub async fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for currency in Currency::ALL {
            if self.refresh(currency).await {
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Refresh every quote that is missing or older than the TTL.
    /// Returns the number of fetch attempts made.
    pub async fn refresh_stale(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<Currency> = Currency::ALL
            .into_iter()
            .filter(|currency| match self.quote(*currency) {
                Some(quote) => now.saturating_duration_since(quote.fetched_at) >= self.ttl,
                None => true,
            })
            .collect();

        for currency in &stale {
            self.refresh(*currency).await;
        }
        stale.len()
    }

    /// Periodic refresher; every tick, the first one immediately, refetches
    /// all currencies regardless of quote age
    pub fn spawn_refresher(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.ttl);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Price refresher started (every {:?})", self.ttl);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.refresh_all().await;
                    }
                    _ = shutdown.recv() => {
                        info!("Price refresher stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted responses, then keeps returning `fallback`
    struct ScriptedSource {
        script: Mutex<Vec<Result<f64, PriceFetchError>>>,
        fallback: Result<f64, PriceFetchError>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<f64, PriceFetchError>>, fallback: Result<f64, PriceFetchError>) -> Arc<Self> {
            let mut script = script;
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_usd_price(&self, _currency: Currency) -> Result<f64, PriceFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    /// Answers after a fixed network delay
    struct SlowSource {
        latency: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch_usd_price(&self, _currency: Currency) -> Result<f64, PriceFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.latency).await;
            Ok(42_000.0)
        }
    }

    fn cache(source: Arc<ScriptedSource>) -> PriceCache {
        PriceCache::new(source, &PriceConfig::default())
    }

    #[test]
    fn test_empty_cache_is_unavailable() {
        let cache = cache(ScriptedSource::new(vec![], Ok(1.0)));

        assert!(matches!(
            cache.get_price(Currency::Btc),
            Err(GameError::PriceUnavailable(Currency::Btc))
        ));
    }

    #[test]
    fn test_unsupported_symbol_never_hits_source() {
        let source = ScriptedSource::new(vec![], Ok(1.0));
        let cache = cache(source.clone());

        assert!(matches!(
            cache.get_price_for_symbol("DOGE"),
            Err(GameError::UnsupportedCurrency(_))
        ));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limits_with_doubling_backoff() {
        let source = ScriptedSource::new(
            vec![
                Err(PriceFetchError::RateLimited),
                Err(PriceFetchError::RateLimited),
                Err(PriceFetchError::RateLimited),
            ],
            Ok(50_000.0),
        );
        let cache = cache(source.clone());
        let start = Instant::now();

        assert_eq!(cache.fetch_with_retry(Currency::Btc).await.unwrap(), 50_000.0);
        assert_eq!(source.calls(), 4);
        // 2s + 4s + 8s
        assert_eq!(start.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_retries() {
        let source = ScriptedSource::new(vec![], Err(PriceFetchError::RateLimited));
        let cache = cache(source.clone());

        let err = cache.fetch_with_retry(Currency::Eth).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failures_are_not_retried() {
        let source = ScriptedSource::new(vec![Err(PriceFetchError::Status(500))], Ok(1.0));
        let cache = cache(source.clone());

        assert!(cache.fetch_with_retry(Currency::Btc).await.is_err());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_stale_quote() {
        let source = ScriptedSource::new(vec![Ok(50_000.0)], Err(PriceFetchError::Status(503)));
        let cache = cache(source);

        assert!(cache.refresh(Currency::Btc).await);
        assert!(!cache.refresh(Currency::Btc).await);
        assert_eq!(cache.get_price(Currency::Btc).unwrap(), 50_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_within_ttl_do_not_fetch() {
        let source = ScriptedSource::new(vec![], Ok(2_000.0));
        let cache = cache(source.clone());

        assert_eq!(cache.refresh_stale().await, 2);
        assert_eq!(source.calls(), 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        let first = cache.get_price(Currency::Eth).unwrap();
        let second = cache.get_price(Currency::Eth).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.refresh_stale().await, 0);
        assert_eq!(source.calls(), 2);

        // Past the TTL exactly one attempt per currency
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.refresh_stale().await, 2);
        assert_eq!(source.calls(), 4);
        assert_eq!(cache.refresh_stale().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_populates_and_stops() {
        let source = ScriptedSource::new(vec![], Ok(3_000.0));
        let cache = Arc::new(cache(source));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = cache.clone().spawn_refresher(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get_price(Currency::Btc).unwrap(), 3_000.0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_keeps_period_with_slow_source() {
        let source = Arc::new(SlowSource {
            latency: Duration::from_millis(300),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(PriceCache::new(source.clone(), &PriceConfig::default()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = cache.clone().spawn_refresher(shutdown_rx);

        // Ticks at 0s, 10s and 20s, two currencies each
        sleep(Duration::from_millis(10_500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        sleep(Duration::from_millis(15_000)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
