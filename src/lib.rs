//! Wheelhouse - real-time wagering-round engine
//!
//! Cycles betting rounds through fixed phases (Open -> Closed -> Completed),
//! accepts concurrent stake placements against a shared account ledger, draws
//! one winning outcome per round, settles every bet exactly once, and streams
//! lifecycle and bet events to all connected observers.

pub mod api;
pub mod bus;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ledger;

pub use bus::{BroadcastBus, GameEvent, RoundSnapshot};
pub use config::{EngineConfig, GameSettings, SettingsProvider, StaticSettingsProvider};
pub use engine::{RoundScheduler, SettlementEngine, TokioClock, UniformDrawer};
pub use errors::{BetError, EngineError, LedgerError, SettlementError};
pub use ledger::{Bet, BetLedger, LedgerStore, MemoryLedger, Round, RoundStatus};
