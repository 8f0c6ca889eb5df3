//! Persistence collaborator for rounds, wallets and the audit trail.
//!
//! Round documents only ever grow: bets and cashouts are appended one by one
//! and the settlement flush merges the in-memory round into whatever is
//! stored, so entries appended concurrently are never dropped.

use crate::{
    errors::{StorageError, StorageResult},
    games::types::{Bet, Cashout, RoundRecord, TransactionRecord, UserRecord},
    storage::RocksStorage,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

const USER_PREFIX: &str = "user:";
const ROUND_PREFIX: &str = "round:";
const TX_PREFIX: &str = "tx:";
const PLAYER_TX_PREFIX: &str = "tx:player:";

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn find_user(&self, player_id: &str) -> StorageResult<Option<UserRecord>>;

    async fn save_user(&self, user: &UserRecord) -> StorageResult<()>;

    async fn create_round(&self, round: &RoundRecord) -> StorageResult<()>;

    async fn find_round(&self, round_id: u64) -> StorageResult<Option<RoundRecord>>;

    async fn append_bet(&self, round_id: u64, bet: &Bet) -> StorageResult<()>;

    async fn append_cashout(&self, round_id: u64, cashout: &Cashout) -> StorageResult<()>;

    /// Merge the final in-memory round into the stored record and stamp it
    /// as finalized
    async fn finalize_round(&self, round: &RoundRecord) -> StorageResult<()>;

    async fn insert_transaction(&self, tx: &TransactionRecord) -> StorageResult<()>;

    /// Audit trail of a player, oldest first
    async fn transactions_for(&self, player_id: &str) -> StorageResult<Vec<TransactionRecord>>;
}

fn user_key(player_id: &str) -> Vec<u8> {
    format!("{}{}", USER_PREFIX, player_id).into_bytes()
}

fn round_key(round_id: u64) -> Vec<u8> {
    // Zero-padded so lexical order is round order
    format!("{}{:020}", ROUND_PREFIX, round_id).into_bytes()
}

fn tx_key(hash: &str) -> Vec<u8> {
    format!("{}{}", TX_PREFIX, hash).into_bytes()
}

fn player_tx_prefix(player_id: &str) -> Vec<u8> {
    format!("{}{}:", PLAYER_TX_PREFIX, hex::encode(player_id)).into_bytes()
}

fn player_tx_key(tx: &TransactionRecord) -> Vec<u8> {
    let mut key = player_tx_prefix(&tx.player_id);
    key.extend_from_slice(
        format!(
            "{:020}:{}",
            tx.timestamp.timestamp_micros().max(0),
            tx.transaction_hash
        )
        .as_bytes(),
    );
    key
}

/// RocksDB-backed store with JSON documents.
///
/// RocksDB calls block, so every trait method runs them on the blocking pool
/// and the callers' table lock never stalls a runtime worker.
#[derive(Clone)]
pub struct RocksGameStore {
    storage: RocksStorage,
    /// Serializes read-modify-write of round documents
    round_write_lock: Arc<Mutex<()>>,
}

impl RocksGameStore {
    pub fn new(storage: RocksStorage) -> Self {
        Self {
            storage,
            round_write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn load<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> StorageResult<Option<T>> {
        match self.storage.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store<T: serde::Serialize>(&self, key: &[u8], value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.storage.put(key, &bytes)
    }

    fn update_round<F>(&self, round_id: u64, apply: F) -> StorageResult<()>
    where
        F: FnOnce(&mut RoundRecord),
    {
        let _guard = self
            .round_write_lock
            .lock()
            .map_err(|_| StorageError::WriteFailed("round write lock poisoned".to_string()))?;

        let key = round_key(round_id);
        let mut record: RoundRecord = self
            .load(&key)?
            .ok_or(StorageError::RoundNotFound(round_id))?;
        apply(&mut record);
        self.store(&key, &record)
    }

    /// Run `op` against a handle to this store on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RocksGameStore) -> StorageResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StorageError::WriteFailed(format!("storage task failed: {}", e)))?
    }

    pub fn find_transaction(&self, hash: &str) -> StorageResult<Option<TransactionRecord>> {
        self.load(&tx_key(hash))
    }

    /// Most recent rounds, newest first
    pub fn recent_rounds(&self, limit: usize) -> StorageResult<Vec<RoundRecord>> {
        // Zero-padded keys make the reverse scan newest first
        self.storage
            .scan_prefix_rev(ROUND_PREFIX.as_bytes(), limit)?
            .iter()
            .map(|(_, value)| serde_json::from_slice(value).map_err(StorageError::from))
            .collect()
    }
}

#[async_trait]
impl GameStore for RocksGameStore {
    async fn find_user(&self, player_id: &str) -> StorageResult<Option<UserRecord>> {
        let key = user_key(player_id);
        self.blocking(move |store| store.load(&key)).await
    }

    async fn save_user(&self, user: &UserRecord) -> StorageResult<()> {
        let user = user.clone();
        self.blocking(move |store| store.store(&user_key(&user.id), &user))
            .await
    }

    async fn create_round(&self, round: &RoundRecord) -> StorageResult<()> {
        let round = round.clone();
        self.blocking(move |store| store.store(&round_key(round.round_id), &round))
            .await
    }

    async fn find_round(&self, round_id: u64) -> StorageResult<Option<RoundRecord>> {
        self.blocking(move |store| store.load(&round_key(round_id)))
            .await
    }

    async fn append_bet(&self, round_id: u64, bet: &Bet) -> StorageResult<()> {
        let bet = bet.clone();
        self.blocking(move |store| store.update_round(round_id, |record| record.bets.push(bet)))
            .await
    }

    async fn append_cashout(&self, round_id: u64, cashout: &Cashout) -> StorageResult<()> {
        let cashout = cashout.clone();
        self.blocking(move |store| {
            store.update_round(round_id, |record| record.cashouts.push(cashout))
        })
        .await
    }

    async fn finalize_round(&self, round: &RoundRecord) -> StorageResult<()> {
        let round = round.clone();
        self.blocking(move |store| {
            store.update_round(round.round_id, |record| {
                record.merge_entries(&round);
                record.finalized_at = Some(round.finalized_at.unwrap_or_else(Utc::now));
            })
        })
        .await
    }

    async fn insert_transaction(&self, tx: &TransactionRecord) -> StorageResult<()> {
        // Hash lookup and per-player index land atomically
        let bytes = serde_json::to_vec(tx).map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        let items = [
            (tx_key(&tx.transaction_hash), bytes.clone()),
            (player_tx_key(tx), bytes),
        ];
        self.blocking(move |store| store.storage.batch_write(&items))
            .await
    }

    async fn transactions_for(&self, player_id: &str) -> StorageResult<Vec<TransactionRecord>> {
        let prefix = player_tx_prefix(player_id);
        self.blocking(move |store| {
            store
                .storage
                .scan_prefix(&prefix, usize::MAX)?
                .iter()
                .map(|(_, value)| serde_json::from_slice(value).map_err(StorageError::from))
                .collect()
        })
        .await
    }
}

/// Process-local store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryGameStore {
    users: DashMap<String, UserRecord>,
    rounds: DashMap<u64, RoundRecord>,
    transactions: DashMap<String, Vec<TransactionRecord>>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    fn update_round<F>(&self, round_id: u64, apply: F) -> StorageResult<()>
    where
        F: FnOnce(&mut RoundRecord),
    {
        let mut record = self
            .rounds
            .get_mut(&round_id)
            .ok_or(StorageError::RoundNotFound(round_id))?;
        apply(record.value_mut());
        Ok(())
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn find_user(&self, player_id: &str) -> StorageResult<Option<UserRecord>> {
        Ok(self.users.get(player_id).map(|u| u.clone()))
    }

    async fn save_user(&self, user: &UserRecord) -> StorageResult<()> {
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn create_round(&self, round: &RoundRecord) -> StorageResult<()> {
        self.rounds.insert(round.round_id, round.clone());
        Ok(())
    }

    async fn find_round(&self, round_id: u64) -> StorageResult<Option<RoundRecord>> {
        Ok(self.rounds.get(&round_id).map(|r| r.clone()))
    }

    async fn append_bet(&self, round_id: u64, bet: &Bet) -> StorageResult<()> {
        self.update_round(round_id, |record| record.bets.push(bet.clone()))
    }

    async fn append_cashout(&self, round_id: u64, cashout: &Cashout) -> StorageResult<()> {
        self.update_round(round_id, |record| record.cashouts.push(cashout.clone()))
    }

    async fn finalize_round(&self, round: &RoundRecord) -> StorageResult<()> {
        self.update_round(round.round_id, |record| {
            record.merge_entries(round);
            record.finalized_at = Some(round.finalized_at.unwrap_or_else(Utc::now));
        })
    }

    async fn insert_transaction(&self, tx: &TransactionRecord) -> StorageResult<()> {
        self.transactions
            .entry(tx.player_id.clone())
            .or_default()
            .push(tx.clone());
        Ok(())
    }

    async fn transactions_for(&self, player_id: &str) -> StorageResult<Vec<TransactionRecord>> {
        Ok(self
            .transactions
            .get(player_id)
            .map(|txs| txs.clone())
            .unwrap_or_default())
    }
}
