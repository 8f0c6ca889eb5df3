//! Round engine: crash points, the multiplier clock, the live round table,
//! bet/cashout coordination and the round lifecycle.

pub mod coordinator;
pub mod crash_point;
pub mod lifecycle;
pub mod multiplier;
pub mod round_table;
pub mod types;

pub use coordinator::{BetCashoutCoordinator, BetReceipt, CashoutReceipt, WalletSummary};
pub use crash_point::CrashPointGenerator;
pub use lifecycle::{RoundLifecycleManager, RoundSummary, RoundTiming};
pub use multiplier::MultiplierClock;
pub use round_table::{RoundSnapshot, RoundTable};
pub use types::*;
