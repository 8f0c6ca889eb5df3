//! Engine metrics exported in Prometheus text format

use crate::games::types::Currency;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct EngineMetrics {
    registry: Registry,
    pub rounds_total: IntCounter,
    pub empty_rounds_total: IntCounter,
    pub bets_total: IntCounter,
    pub cashouts_total: IntCounter,
    pub rejected_requests_total: IntCounterVec,
    pub price_fetch_failures_total: IntCounterVec,
    pub settlement_failures_total: IntCounter,
    pub current_multiplier: Gauge,
    pub websocket_clients: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("crash".to_string()), None)?;

        let rounds_total = IntCounter::new("rounds_total", "Rounds started")?;
        let empty_rounds_total =
            IntCounter::new("empty_rounds_total", "Rounds settled without any bet")?;
        let bets_total = IntCounter::new("bets_total", "Accepted bets")?;
        let cashouts_total = IntCounter::new("cashouts_total", "Successful cashouts")?;
        let rejected_requests_total = IntCounterVec::new(
            Opts::new("rejected_requests_total", "Rejected bet and cashout requests"),
            &["reason"],
        )?;
        let price_fetch_failures_total = IntCounterVec::new(
            Opts::new("price_fetch_failures_total", "Failed price refreshes"),
            &["symbol"],
        )?;
        let settlement_failures_total = IntCounter::new(
            "settlement_failures_total",
            "Round records that could not be flushed at settlement",
        )?;
        let current_multiplier = Gauge::new("current_multiplier", "Multiplier of the live round")?;
        let websocket_clients = IntGauge::new("websocket_clients", "Connected WebSocket clients")?;

        registry.register(Box::new(rounds_total.clone()))?;
        registry.register(Box::new(empty_rounds_total.clone()))?;
        registry.register(Box::new(bets_total.clone()))?;
        registry.register(Box::new(cashouts_total.clone()))?;
        registry.register(Box::new(rejected_requests_total.clone()))?;
        registry.register(Box::new(price_fetch_failures_total.clone()))?;
        registry.register(Box::new(settlement_failures_total.clone()))?;
        registry.register(Box::new(current_multiplier.clone()))?;
        registry.register(Box::new(websocket_clients.clone()))?;

        Ok(Self {
            registry,
            rounds_total,
            empty_rounds_total,
            bets_total,
            cashouts_total,
            rejected_requests_total,
            price_fetch_failures_total,
            settlement_failures_total,
            current_multiplier,
            websocket_clients,
        })
    }

    pub fn record_rejection(&self, reason: &str) {
        self.rejected_requests_total.with_label_values(&[reason]).inc();
    }

    pub fn record_price_failure(&self, currency: Currency) {
        self.price_fetch_failures_total
            .with_label_values(&[currency.symbol()])
            .inc();
    }

    pub fn to_prometheus_format(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_export() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.bets_total.inc();
        metrics.record_rejection("INSUFFICIENT_FUNDS");
        metrics.record_price_failure(Currency::Eth);

        let text = metrics.to_prometheus_format().unwrap();
        assert!(text.contains("crash_bets_total 1"));
        assert!(text.contains("crash_rejected_requests_total{reason=\"INSUFFICIENT_FUNDS\"} 1"));
        assert!(text.contains("crash_price_fetch_failures_total{symbol=\"ETH\"} 1"));
    }
}
