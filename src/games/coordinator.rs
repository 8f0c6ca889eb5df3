//! Bet and cashout request handling against the live round
//!
//! Every commit runs under the round table lock. The lifecycle manager takes
//! the same lock to write the multiplier and to commit the crash, so a
//! cashout either sees the round before the crash or fails.

use super::{
    round_table::{LiveRound, RoundSnapshot, RoundTable},
    types::{
        round_to, ActivePlayerState, Bet, Cashout, Currency, TransactionRecord, TransactionType,
        UserRecord, Wallet,
    },
};
use crate::{
    errors::{GameError, GameResult},
    events::{EventBroadcaster, RoundEvent},
    game_store::GameStore,
    metrics::EngineMetrics,
    prices::PriceCache,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, warn};

/// Confirmation of an accepted bet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BetReceipt {
    pub round_id: u64,
    pub player_id: String,
    pub usd_amount: f64,
    pub crypto_amount: f64,
    pub crypto_type: Currency,
    pub price_at_bet_time: f64,
}

/// Result of a successful cashout; `usd_value` has 2 decimals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CashoutReceipt {
    pub player_id: String,
    pub usd_value: f64,
    pub multiplier: f64,
}

/// Wallet balances with their value at current cached prices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    pub wallet: Wallet,
    pub usd_equivalent: BTreeMap<Currency, f64>,
}

pub struct BetCashoutCoordinator {
    table: Arc<RoundTable>,
    store: Arc<dyn GameStore>,
    prices: Arc<PriceCache>,
    events: EventBroadcaster,
    starting_balance: f64,
    metrics: Option<Arc<EngineMetrics>>,
}

impl BetCashoutCoordinator {
    pub fn new(
        table: Arc<RoundTable>,
        store: Arc<dyn GameStore>,
        prices: Arc<PriceCache>,
        events: EventBroadcaster,
        starting_balance: f64,
    ) -> Self {
        Self {
            table,
            store,
            prices,
            events,
            starting_balance,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn round_snapshot(&self) -> Option<RoundSnapshot> {
        self.table.snapshot().await
    }

    /// Stake `usd_amount` worth of `symbol` on the live round
    pub async fn place_bet(
        &self,
        player_id: &str,
        usd_amount: f64,
        symbol: &str,
    ) -> GameResult<BetReceipt> {
        let result = self.try_place_bet(player_id, usd_amount, symbol).await;
        self.observe(Action::Bet, player_id, &result);
        result
    }

    /// Lock in the current multiplier for the player's open bet
    pub async fn cashout(&self, player_id: &str) -> GameResult<CashoutReceipt> {
        let result = self.try_cashout(player_id).await;
        self.observe(Action::Cashout, player_id, &result);
        result
    }

    /// `None` when the player has never been seen
    pub async fn wallet(&self, player_id: &str) -> GameResult<Option<WalletSummary>> {
        let Some(user) = self.store.find_user(player_id).await? else {
            return Ok(None);
        };

        let mut usd_equivalent = BTreeMap::new();
        for (currency, balance) in user.wallet.iter() {
            let price = self.prices.get_price(currency)?;
            usd_equivalent.insert(currency, round_to(balance * price, 2));
        }

        Ok(Some(WalletSummary {
            wallet: user.wallet,
            usd_equivalent,
        }))
    }

    pub async fn transactions(&self, player_id: &str) -> GameResult<Vec<TransactionRecord>> {
        Ok(self.store.transactions_for(player_id).await?)
    }

    async fn try_place_bet(
        &self,
        player_id: &str,
        usd_amount: f64,
        symbol: &str,
    ) -> GameResult<BetReceipt> {
        validate_player_id(player_id)?;
        if !usd_amount.is_finite() || usd_amount <= 0.0 {
            return Err(GameError::InvalidRequest(format!(
                "usdAmount must be a positive number, got {}",
                usd_amount
            )));
        }

        let mut guard = self.table.lock().await;
        let round = match guard.as_mut() {
            Some(round) if round.accepts_bets() => round,
            _ => return Err(GameError::RoundNotStarted),
        };

        let (currency, price) = self.prices.get_price_for_symbol(symbol)?;
        // Cashed-out players leave `players` but keep their bet entry
        if round.record.bets.iter().any(|b| b.player_id == player_id) {
            return Err(GameError::DuplicateBet(player_id.to_string()));
        }

        let crypto_amount = usd_amount / price;
        let mut user = self.load_or_provision(player_id).await?;
        let available = user.wallet.balance(currency);
        if crypto_amount > available {
            return Err(GameError::InsufficientFunds {
                currency,
                required: crypto_amount,
                available,
            });
        }

        user.wallet.debit(currency, crypto_amount);
        self.store.save_user(&user).await?;

        let bet = Bet {
            player_id: player_id.to_string(),
            usd_amount,
            crypto_amount,
            crypto_type: currency,
        };
        if let Err(e) = self.record_bet(round, &bet, price).await {
            user.wallet.credit(currency, crypto_amount);
            self.restore_wallet(&user).await;
            return Err(e);
        }

        round.record.bets.push(bet);
        round.players.insert(
            player_id.to_string(),
            ActivePlayerState {
                usd_amount,
                crypto_type: currency,
                crypto_amount,
                price_at_bet_time: price,
            },
        );
        if round.signal_first_bet() {
            debug!("First bet of round {} received", round.round_id());
        }

        Ok(BetReceipt {
            round_id: round.round_id(),
            player_id: player_id.to_string(),
            usd_amount,
            crypto_amount,
            crypto_type: currency,
            price_at_bet_time: price,
        })
    }

    /// Durable side of a bet: the round document on first bet, the bet
    /// entry and the audit transaction
    async fn record_bet(&self, round: &mut LiveRound, bet: &Bet, price: f64) -> GameResult<()> {
        if !round.persisted {
            self.store.create_round(&round.record).await?;
            round.persisted = true;
        }
        self.store.append_bet(round.round_id(), bet).await?;
        self.store
            .insert_transaction(&TransactionRecord::new(
                &bet.player_id,
                TransactionType::Bet,
                bet.crypto_type,
                bet.crypto_amount,
                bet.usd_amount,
                price,
            ))
            .await?;
        Ok(())
    }

    async fn try_cashout(&self, player_id: &str) -> GameResult<CashoutReceipt> {
        validate_player_id(player_id)?;

        let mut guard = self.table.lock().await;
        let active = guard
            .as_ref()
            .and_then(|round| round.players.get(player_id).cloned());
        let (round, state) = match (guard.as_mut(), active) {
            (Some(round), Some(state)) => (round, state),
            _ => {
                self.load_or_provision(player_id).await?;
                return Err(GameError::NoActiveBet);
            }
        };

        if round.has_crashed() {
            return Err(GameError::AlreadyCrashed);
        }

        let multiplier = round.multiplier;
        let payout = round_to(state.crypto_amount * multiplier, 8);
        let usd_value = payout * state.price_at_bet_time;

        let mut user = self.load_or_provision(player_id).await?;
        user.wallet.credit(state.crypto_type, payout);
        self.store.save_user(&user).await?;

        let cashout = Cashout {
            player_id: player_id.to_string(),
            crypto_amount: payout,
            multiplier,
            usd_value,
        };
        if let Err(e) = self.record_cashout(round.round_id(), &cashout, &state).await {
            user.wallet.debit(state.crypto_type, payout);
            self.restore_wallet(&user).await;
            return Err(e);
        }

        round.record.cashouts.push(cashout);
        round.players.remove(player_id);
        self.events.publish(RoundEvent::PlayerCashout {
            player_id: player_id.to_string(),
            crypto_amount: payout,
            multiplier,
            usd_value,
        });

        Ok(CashoutReceipt {
            player_id: player_id.to_string(),
            usd_value: round_to(usd_value, 2),
            multiplier,
        })
    }

    async fn record_cashout(
        &self,
        round_id: u64,
        cashout: &Cashout,
        state: &ActivePlayerState,
    ) -> GameResult<()> {
        self.store.append_cashout(round_id, cashout).await?;
        self.store
            .insert_transaction(&TransactionRecord::new(
                &cashout.player_id,
                TransactionType::Cashout,
                state.crypto_type,
                cashout.crypto_amount,
                cashout.usd_value,
                state.price_at_bet_time,
            ))
            .await?;
        Ok(())
    }

    async fn load_or_provision(&self, player_id: &str) -> GameResult<UserRecord> {
        if let Some(user) = self.store.find_user(player_id).await? {
            return Ok(user);
        }

        let user = UserRecord::new(player_id, self.starting_balance);
        self.store.save_user(&user).await?;
        info!("Provisioned wallet for new player {}", player_id);
        Ok(user)
    }

    /// Best-effort revert of a wallet write whose follow-up writes failed
    async fn restore_wallet(&self, user: &UserRecord) {
        if let Err(e) = self.store.save_user(user).await {
            warn!("Failed to restore wallet of {}: {}", user.id, e);
        }
    }

    fn observe<T>(&self, action: Action, player_id: &str, result: &GameResult<T>) {
        match result {
            Ok(_) => {
                debug!("{} accepted for {}", action.label(), player_id);
                if let Some(metrics) = &self.metrics {
                    match action {
                        Action::Bet => metrics.bets_total.inc(),
                        Action::Cashout => metrics.cashouts_total.inc(),
                    }
                }
            }
            Err(e) => {
                debug!("{} rejected for {}: {}", action.label(), player_id, e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejection(e.code());
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Bet,
    Cashout,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Action::Bet => "Bet",
            Action::Cashout => "Cashout",
        }
    }
}

fn validate_player_id(player_id: &str) -> GameResult<()> {
    if player_id.trim().is_empty() {
        return Err(GameError::InvalidRequest("playerId is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PriceConfig,
        errors::{StorageError, StorageResult},
        game_store::MemoryGameStore,
        games::types::{RoundPhase, RoundRecord},
        prices::source::{PriceFetchError, PriceSource},
    };
    use async_trait::async_trait;

    struct NoSource;

    #[async_trait]
    impl PriceSource for NoSource {
        fn name(&self) -> &str {
            "none"
        }

        async fn fetch_usd_price(&self, currency: Currency) -> Result<f64, PriceFetchError> {
            Err(PriceFetchError::MissingPrice(currency))
        }
    }

    /// Memory store whose bet appends always fail
    #[derive(Default)]
    struct BrokenAppendStore {
        inner: MemoryGameStore,
    }

    #[async_trait]
    impl GameStore for BrokenAppendStore {
        async fn find_user(&self, player_id: &str) -> StorageResult<Option<UserRecord>> {
            self.inner.find_user(player_id).await
        }
        async fn save_user(&self, user: &UserRecord) -> StorageResult<()> {
            self.inner.save_user(user).await
        }
        async fn create_round(&self, round: &RoundRecord) -> StorageResult<()> {
            self.inner.create_round(round).await
        }
        async fn find_round(&self, round_id: u64) -> StorageResult<Option<RoundRecord>> {
            self.inner.find_round(round_id).await
        }
        async fn append_bet(&self, _round_id: u64, _bet: &Bet) -> StorageResult<()> {
            Err(StorageError::WriteFailed("disk full".to_string()))
        }
        async fn append_cashout(&self, round_id: u64, cashout: &Cashout) -> StorageResult<()> {
            self.inner.append_cashout(round_id, cashout).await
        }
        async fn finalize_round(&self, round: &RoundRecord) -> StorageResult<()> {
            self.inner.finalize_round(round).await
        }
        async fn insert_transaction(&self, tx: &TransactionRecord) -> StorageResult<()> {
            self.inner.insert_transaction(tx).await
        }
        async fn transactions_for(&self, player_id: &str) -> StorageResult<Vec<TransactionRecord>> {
            self.inner.transactions_for(player_id).await
        }
    }

    struct Fixture {
        table: Arc<RoundTable>,
        store: Arc<MemoryGameStore>,
        events: EventBroadcaster,
        coordinator: Arc<BetCashoutCoordinator>,
    }

    fn prices() -> Arc<PriceCache> {
        let cache = PriceCache::new(Arc::new(NoSource), &PriceConfig::default());
        cache.store_quote(Currency::Btc, 50_000.0);
        cache.store_quote(Currency::Eth, 2_500.0);
        Arc::new(cache)
    }

    fn fixture() -> Fixture {
        let table = Arc::new(RoundTable::new());
        let store = Arc::new(MemoryGameStore::new());
        let events = EventBroadcaster::default();
        let coordinator = Arc::new(BetCashoutCoordinator::new(
            table.clone(),
            store.clone(),
            prices(),
            events.clone(),
            5.0,
        ));
        Fixture {
            table,
            store,
            events,
            coordinator,
        }
    }

    async fn install_round(table: &RoundTable, round_id: u64, crash_point: f64, multiplier: f64) {
        let (mut round, _rx) = LiveRound::new(round_id, crash_point);
        round.multiplier = multiplier;
        *table.lock().await = Some(round);
    }

    async fn set_multiplier(table: &RoundTable, multiplier: f64) {
        let mut guard = table.lock().await;
        let round = guard.as_mut().unwrap();
        round.multiplier = multiplier;
        round.phase = RoundPhase::Running;
    }

    async fn btc_balance(store: &MemoryGameStore, player_id: &str) -> f64 {
        store
            .find_user(player_id)
            .await
            .unwrap()
            .unwrap()
            .wallet
            .balance(Currency::Btc)
    }

    #[tokio::test]
    async fn test_bet_without_round_is_rejected() {
        let f = fixture();

        let err = f.coordinator.place_bet("alice", 10.0, "BTC").await.unwrap_err();
        assert!(matches!(err, GameError::RoundNotStarted));
        assert!(f.store.find_user("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_btc_bet_and_cashout_at_two_x() {
        let f = fixture();
        install_round(&f.table, 1, 2.85, 1.0).await;
        let mut events = f.events.subscribe();

        let receipt = f.coordinator.place_bet("alice", 10.0, "btc").await.unwrap();
        assert_eq!(receipt.crypto_amount, 0.0002);
        assert_eq!(receipt.price_at_bet_time, 50_000.0);
        assert!((btc_balance(&f.store, "alice").await - 4.9998).abs() < 1e-12);

        set_multiplier(&f.table, 2.0).await;
        let cashout = f.coordinator.cashout("alice").await.unwrap();
        assert_eq!(cashout.multiplier, 2.0);
        assert_eq!(cashout.usd_value, 20.0);
        assert!((btc_balance(&f.store, "alice").await - 5.0002).abs() < 1e-12);

        match events.recv().await.unwrap() {
            RoundEvent::PlayerCashout {
                player_id,
                crypto_amount,
                ..
            } => {
                assert_eq!(player_id, "alice");
                assert_eq!(crypto_amount, 0.0004);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let round = f.store.find_round(1).await.unwrap().unwrap();
        assert_eq!(round.bets.len(), 1);
        assert_eq!(round.cashouts.len(), 1);

        let txs = f.coordinator.transactions("alice").await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].transaction_type, TransactionType::Bet);
        assert_eq!(txs[1].transaction_type, TransactionType::Cashout);
        assert_eq!(txs[1].price_at_time, 50_000.0);
    }

    #[tokio::test]
    async fn test_wallet_conservation() {
        let f = fixture();
        install_round(&f.table, 1, 5.0, 1.0).await;

        let before = 5.0;
        let bet = f.coordinator.place_bet("bob", 1234.0, "ETH").await.unwrap();
        set_multiplier(&f.table, 1.37).await;
        f.coordinator.cashout("bob").await.unwrap();

        let round = f.store.find_round(1).await.unwrap().unwrap();
        let after = f
            .store
            .find_user("bob")
            .await
            .unwrap()
            .unwrap()
            .wallet
            .balance(Currency::Eth);
        let expected = before - bet.crypto_amount + round.cashouts[0].crypto_amount;
        assert!((after - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_second_cashout_has_no_active_bet() {
        let f = fixture();
        install_round(&f.table, 1, 3.0, 1.0).await;

        f.coordinator.place_bet("alice", 10.0, "BTC").await.unwrap();
        set_multiplier(&f.table, 1.5).await;
        f.coordinator.cashout("alice").await.unwrap();

        let err = f.coordinator.cashout("alice").await.unwrap_err();
        assert!(matches!(err, GameError::NoActiveBet));
    }

    #[tokio::test]
    async fn test_no_second_bet_after_cashout() {
        let f = fixture();
        install_round(&f.table, 1, 3.0, 1.0).await;

        f.coordinator.place_bet("alice", 10.0, "BTC").await.unwrap();
        set_multiplier(&f.table, 1.5).await;
        f.coordinator.cashout("alice").await.unwrap();
        let balance = btc_balance(&f.store, "alice").await;

        let err = f.coordinator.place_bet("alice", 10.0, "BTC").await.unwrap_err();
        assert!(matches!(err, GameError::DuplicateBet(_)));
        assert_eq!(btc_balance(&f.store, "alice").await, balance);
        assert_eq!(f.store.find_round(1).await.unwrap().unwrap().bets.len(), 1);
    }

    #[tokio::test]
    async fn test_cashout_without_bet_provisions_wallet() {
        let f = fixture();
        install_round(&f.table, 1, 3.0, 1.2).await;

        let err = f.coordinator.cashout("carol").await.unwrap_err();
        assert!(matches!(err, GameError::NoActiveBet));
        assert_eq!(btc_balance(&f.store, "carol").await, 5.0);
    }

    #[tokio::test]
    async fn test_cashout_at_crash_point_fails() {
        let f = fixture();
        install_round(&f.table, 1, 2.0, 1.0).await;
        f.coordinator.place_bet("alice", 10.0, "BTC").await.unwrap();

        set_multiplier(&f.table, 2.0).await;

        let err = f.coordinator.cashout("alice").await.unwrap_err();
        assert!(matches!(err, GameError::AlreadyCrashed));
        assert!((btc_balance(&f.store, "alice").await - 4.9998).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_cashout_after_crash_commit_fails_below_crash_point() {
        let f = fixture();
        install_round(&f.table, 1, 2.0, 1.0).await;
        f.coordinator.place_bet("alice", 10.0, "BTC").await.unwrap();

        {
            let mut guard = f.table.lock().await;
            let round = guard.as_mut().unwrap();
            round.multiplier = 1.5;
            round.phase = RoundPhase::Crashed;
        }

        let err = f.coordinator.cashout("alice").await.unwrap_err();
        assert!(matches!(err, GameError::AlreadyCrashed));
    }

    #[tokio::test]
    async fn test_bets_rejected_once_crashed() {
        let f = fixture();
        install_round(&f.table, 1, 2.0, 1.0).await;
        f.table.lock().await.as_mut().unwrap().phase = RoundPhase::Crashed;

        let err = f.coordinator.place_bet("alice", 10.0, "BTC").await.unwrap_err();
        assert!(matches!(err, GameError::RoundNotStarted));
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let f = fixture();
        install_round(&f.table, 1, 2.0, 1.0).await;

        // 5 BTC at 50k is 250k USD
        let err = f.coordinator.place_bet("alice", 250_001.0, "BTC").await.unwrap_err();
        assert!(matches!(
            err,
            GameError::InsufficientFunds {
                currency: Currency::Btc,
                ..
            }
        ));
        assert_eq!(btc_balance(&f.store, "alice").await, 5.0);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let f = fixture();
        install_round(&f.table, 1, 2.0, 1.0).await;

        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                f.coordinator.place_bet("alice", amount, "BTC").await,
                Err(GameError::InvalidRequest(_))
            ));
        }
        assert!(matches!(
            f.coordinator.place_bet("  ", 10.0, "BTC").await,
            Err(GameError::InvalidRequest(_))
        ));
        assert!(matches!(
            f.coordinator.place_bet("alice", 10.0, "DOGE").await,
            Err(GameError::UnsupportedCurrency(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_double_bet_debits_once() {
        let f = fixture();
        install_round(&f.table, 1, 2.0, 1.0).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = f.coordinator.clone();
                tokio::spawn(async move { coordinator.place_bet("alice", 10.0, "BTC").await })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert!(matches!(e, GameError::DuplicateBet(_))),
            }
        }

        assert_eq!(accepted, 1);
        assert!((btc_balance(&f.store, "alice").await - 4.9998).abs() < 1e-12);
        assert_eq!(f.store.find_round(1).await.unwrap().unwrap().bets.len(), 1);
    }

    #[tokio::test]
    async fn test_first_bet_signals_lifecycle_once() {
        let f = fixture();
        let (round, rx) = LiveRound::new(9, 2.0);
        *f.table.lock().await = Some(round);

        f.coordinator.place_bet("alice", 10.0, "BTC").await.unwrap();
        f.coordinator.place_bet("bob", 10.0, "ETH").await.unwrap();

        assert!(rx.await.is_ok());
        assert_eq!(f.store.round_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_reverts_debit() {
        let table = Arc::new(RoundTable::new());
        let store = Arc::new(BrokenAppendStore::default());
        let coordinator = BetCashoutCoordinator::new(
            table.clone(),
            store.clone(),
            prices(),
            EventBroadcaster::default(),
            5.0,
        );
        install_round(&table, 1, 2.0, 1.0).await;

        let err = coordinator.place_bet("alice", 10.0, "BTC").await.unwrap_err();
        assert!(matches!(err, GameError::PersistenceFailure(_)));

        let user = store.find_user("alice").await.unwrap().unwrap();
        assert_eq!(user.wallet.balance(Currency::Btc), 5.0);
        let guard = table.lock().await;
        assert!(guard.as_ref().unwrap().players.is_empty());
    }

    #[tokio::test]
    async fn test_outcomes_feed_metrics() {
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let table = Arc::new(RoundTable::new());
        let coordinator = BetCashoutCoordinator::new(
            table.clone(),
            Arc::new(MemoryGameStore::new()),
            prices(),
            EventBroadcaster::default(),
            5.0,
        )
        .with_metrics(metrics.clone());
        install_round(&table, 1, 3.0, 1.0).await;

        coordinator.place_bet("alice", 10.0, "BTC").await.unwrap();
        set_multiplier(&table, 1.2).await;
        coordinator.cashout("alice").await.unwrap();
        assert!(coordinator.cashout("alice").await.is_err());

        assert_eq!(metrics.bets_total.get(), 1);
        assert_eq!(metrics.cashouts_total.get(), 1);
        assert_eq!(
            metrics
                .rejected_requests_total
                .with_label_values(&["NO_ACTIVE_BET"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_wallet_summary() {
        let f = fixture();
        assert!(f.coordinator.wallet("nobody").await.unwrap().is_none());

        f.store.save_user(&UserRecord::new("alice", 5.0)).await.unwrap();
        let summary = f.coordinator.wallet("alice").await.unwrap().unwrap();

        assert_eq!(summary.usd_equivalent[&Currency::Btc], 250_000.0);
        assert_eq!(summary.usd_equivalent[&Currency::Eth], 12_500.0);
    }
}
