//! The single live round shared by the lifecycle manager and the coordinator
//!
//! All round transitions and all bet/cashout commits happen while holding the
//! table lock, so a cashout can never observe a round whose crash has already
//! been committed.

use super::types::{ActivePlayerState, RoundPhase, RoundRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex, MutexGuard};

/// In-memory state of the current round
pub struct LiveRound {
    pub record: RoundRecord,
    pub phase: RoundPhase,
    /// Last multiplier written by the clock tick
    pub multiplier: f64,
    pub players: HashMap<String, ActivePlayerState>,
    /// The durable round record has been created
    pub persisted: bool,
    first_bet: Option<oneshot::Sender<()>>,
}

impl LiveRound {
    /// New round awaiting its first bet, plus the receiving end of the
    /// first-bet signal
    pub fn new(round_id: u64, crash_point: f64) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let round = Self {
            record: RoundRecord {
                round_id,
                crash_point,
                bets: Vec::new(),
                cashouts: Vec::new(),
                created_at: Utc::now(),
                finalized_at: None,
            },
            phase: RoundPhase::AwaitingBet,
            multiplier: 1.0,
            players: HashMap::new(),
            persisted: false,
            first_bet: Some(tx),
        };
        (round, rx)
    }

    pub fn round_id(&self) -> u64 {
        self.record.round_id
    }

    pub fn crash_point(&self) -> f64 {
        self.record.crash_point
    }

    pub fn accepts_bets(&self) -> bool {
        self.phase != RoundPhase::Crashed
    }

    pub fn has_crashed(&self) -> bool {
        self.phase == RoundPhase::Crashed || self.multiplier >= self.crash_point()
    }

    /// Wake the lifecycle manager. Only the first call sends; later calls
    /// return false.
    pub fn signal_first_bet(&mut self) -> bool {
        match self.first_bet.take() {
            Some(tx) => {
                // The waiter may already have timed out and dropped the receiver
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Disarm the first-bet signal without firing it
    pub fn close_bet_signal(&mut self) {
        self.first_bet = None;
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round_id: self.round_id(),
            phase: self.phase,
            multiplier: self.multiplier,
            total_bets: self.record.bets.len(),
            total_cashouts: self.record.cashouts.len(),
            active_players: self.players.len(),
        }
    }
}

/// Read-only view of the live round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub round_id: u64,
    pub phase: RoundPhase,
    pub multiplier: f64,
    pub total_bets: usize,
    pub total_cashouts: usize,
    pub active_players: usize,
}

/// Holder of the one live round, `None` between settlement and the next start
#[derive(Default)]
pub struct RoundTable {
    inner: Mutex<Option<LiveRound>>,
}

impl RoundTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, Option<LiveRound>> {
        self.inner.lock().await
    }

    pub async fn snapshot(&self) -> Option<RoundSnapshot> {
        self.inner.lock().await.as_ref().map(LiveRound::snapshot)
    }
}
