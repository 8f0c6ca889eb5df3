//! Crashline - crash betting round engine
//!
//! A multiplier rises from 1.00x towards a crash point fixed before the
//! round opens. Players stake USD worth of BTC or ETH and cash out before the
//! crash to receive their stake times the multiplier.

pub mod api;
pub mod config;
pub mod errors;
pub mod events;
pub mod game_store;
pub mod games;
pub mod metrics;
pub mod prices;
pub mod storage;

pub use config::{ConfigLoader, CrashConfig};
pub use errors::{GameError, GameResult, StorageError};
pub use events::{EventBroadcaster, RoundEvent};
pub use game_store::{GameStore, MemoryGameStore, RocksGameStore};
pub use games::{BetCashoutCoordinator, RoundLifecycleManager, RoundTable};
pub use prices::{PriceCache, PriceSource};
pub use storage::RocksStorage;
