use crate::errors::GameError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Supported staking currencies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Currency {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Btc, Currency::Eth];

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
        }
    }

    /// Identifier used by the CoinGecko simple price endpoint
    pub fn coingecko_id(&self) -> &'static str {
        match self {
            Currency::Btc => "bitcoin",
            Currency::Eth => "ethereum",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Currency {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTC" => Ok(Currency::Btc),
            "ETH" => Ok(Currency::Eth),
            _ => Err(GameError::UnsupportedCurrency(s.to_string())),
        }
    }
}

/// Per-currency balances owned by a player
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Wallet {
    balances: BTreeMap<Currency, f64>,
}

impl Wallet {
    /// Wallet holding `starting_balance` of every supported currency
    pub fn provisioned(starting_balance: f64) -> Self {
        Self {
            balances: Currency::ALL.iter().map(|c| (*c, starting_balance)).collect(),
        }
    }

    pub fn balance(&self, currency: Currency) -> f64 {
        self.balances.get(&currency).copied().unwrap_or(0.0)
    }

    /// Remove `amount` from the balance; the caller has already checked funds.
    pub fn debit(&mut self, currency: Currency, amount: f64) {
        let balance = self.balances.entry(currency).or_insert(0.0);
        *balance = (*balance - amount).max(0.0);
    }

    pub fn credit(&mut self, currency: Currency, amount: f64) {
        *self.balances.entry(currency).or_insert(0.0) += amount;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Currency, f64)> + '_ {
        self.balances.iter().map(|(c, b)| (*c, *b))
    }
}

/// Durable player record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub wallet: Wallet,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, starting_balance: f64) -> Self {
        Self {
            id: id.into(),
            wallet: Wallet::provisioned(starting_balance),
            created_at: Utc::now(),
        }
    }
}

/// Stake recorded in a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub player_id: String,
    pub usd_amount: f64,
    pub crypto_amount: f64,
    pub crypto_type: Currency,
}

/// Payout recorded in a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cashout {
    pub player_id: String,
    pub crypto_amount: f64,
    pub multiplier: f64,
    pub usd_value: f64,
}

/// Durable round document, written once the first bet arrives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    pub round_id: u64,
    pub crash_point: f64,
    pub bets: Vec<Bet>,
    pub cashouts: Vec<Cashout>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl RoundRecord {
    /// Append entries from `other` that this record does not hold yet.
    ///
    /// A player bets and cashes out at most once per round, so the player id
    /// identifies an entry.
    pub fn merge_entries(&mut self, other: &RoundRecord) {
        for bet in &other.bets {
            if !self.bets.iter().any(|b| b.player_id == bet.player_id) {
                self.bets.push(bet.clone());
            }
        }
        for cashout in &other.cashouts {
            if !self.cashouts.iter().any(|c| c.player_id == cashout.player_id) {
                self.cashouts.push(cashout.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Bet,
    Cashout,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Bet => write!(f, "bet"),
            TransactionType::Cashout => write!(f, "cashout"),
        }
    }
}

/// Append-only audit entry for every bet and cashout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub player_id: String,
    pub usd_amount: f64,
    pub crypto_amount: f64,
    pub currency: Currency,
    pub transaction_type: TransactionType,
    pub transaction_hash: String,
    pub price_at_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        player_id: &str,
        transaction_type: TransactionType,
        currency: Currency,
        crypto_amount: f64,
        usd_amount: f64,
        price_at_time: f64,
    ) -> Self {
        Self {
            player_id: player_id.to_string(),
            usd_amount,
            crypto_amount,
            currency,
            transaction_type,
            transaction_hash: uuid::Uuid::new_v4().to_string(),
            price_at_time,
            timestamp: Utc::now(),
        }
    }
}

/// Round-scoped state of a player holding an open bet
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePlayerState {
    pub usd_amount: f64,
    pub crypto_type: Currency,
    pub crypto_amount: f64,
    pub price_at_bet_time: f64,
}

/// Lifecycle phase of the live round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    AwaitingBet,
    Running,
    Crashed,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::AwaitingBet => write!(f, "awaiting_bet"),
            RoundPhase::Running => write!(f, "running"),
            RoundPhase::Crashed => write!(f, "crashed"),
        }
    }
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
