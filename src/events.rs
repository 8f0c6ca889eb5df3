//! Round events pushed to every connected observer

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Stake summary included in the crash event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BetSummary {
    pub player_id: String,
    pub usd_amount: f64,
}

/// Payout summary included in the crash event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CashoutSummary {
    pub player_id: String,
    pub usd_value: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RoundEvent {
    /// A new round opened for bets
    #[serde(rename_all = "camelCase")]
    RoundStart { round_id: u64, crash_point: f64 },

    #[serde(rename_all = "camelCase")]
    MultiplierUpdate { multiplier: f64 },

    #[serde(rename_all = "camelCase")]
    PlayerCashout {
        player_id: String,
        crypto_amount: f64,
        multiplier: f64,
        usd_value: f64,
    },

    /// Round settled; `duration` is the multiplier phase length in seconds
    #[serde(rename_all = "camelCase")]
    RoundCrash {
        crash_point: f64,
        duration: f64,
        total_bets: usize,
        total_cashouts: usize,
        all_bets: Vec<BetSummary>,
        all_cashouts: Vec<CashoutSummary>,
    },
}

impl RoundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::RoundStart { .. } => "roundStart",
            RoundEvent::MultiplierUpdate { .. } => "multiplierUpdate",
            RoundEvent::PlayerCashout { .. } => "playerCashout",
            RoundEvent::RoundCrash { .. } => "roundCrash",
        }
    }
}

/// Fan-out of round events; sending never blocks and never fails the engine
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<RoundEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RoundEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!("No observers for {} event", name);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = RoundEvent::RoundStart {
            round_id: 1_700_000_000_000,
            crash_point: 2.85,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "event": "roundStart",
                "data": { "roundId": 1_700_000_000_000u64, "crashPoint": 2.85 }
            })
        );
    }

    #[test]
    fn test_crash_event_field_names() {
        let event = RoundEvent::RoundCrash {
            crash_point: 1.5,
            duration: 5.0,
            total_bets: 1,
            total_cashouts: 0,
            all_bets: vec![BetSummary {
                player_id: "p1".to_string(),
                usd_amount: 10.0,
            }],
            all_cashouts: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "roundCrash");
        assert_eq!(json["data"]["totalBets"], 1);
        assert_eq!(json["data"]["allBets"][0]["playerId"], "p1");
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let broadcaster = EventBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        broadcaster.publish(RoundEvent::MultiplierUpdate { multiplier: 1.25 });

        assert_eq!(
            rx.recv().await.unwrap(),
            RoundEvent::MultiplierUpdate { multiplier: 1.25 }
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = EventBroadcaster::default();
        broadcaster.publish(RoundEvent::MultiplierUpdate { multiplier: 1.0 });
        assert_eq!(broadcaster.observer_count(), 0);
    }
}
