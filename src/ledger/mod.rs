//! Account, round, and bet ledger: domain types, the atomic store, and the
//! bet-placement service.

pub mod bets;
pub mod store;
pub mod types;

pub use bets::BetLedger;
pub use store::{LedgerStore, MemoryLedger};
pub use types::{Account, AccountId, Bet, BetOutcome, Role, Round, RoundStatus};
