//! Round lifecycle engine: clock seam, scheduler, and settlement.

pub mod clock;
pub mod scheduler;
pub mod settlement;

pub use clock::{Clock, TokioClock};
pub use scheduler::RoundScheduler;
pub use settlement::{OutcomeDrawer, SettlementEngine, SettlementReport, UniformDrawer};
