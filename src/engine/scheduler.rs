//! Round scheduler: the single owner of the current round's lifecycle.
//!
//! One long-lived task drives every round through Open -> Closed ->
//! Completed on the clock, calls settlement between close and reveal, and
//! publishes an event at every transition. Nothing else mutates round phase.

use crate::bus::{BroadcastBus, GameEvent, RoundSnapshot};
use crate::config::{GameSettings, SettingsProvider};
use crate::engine::clock::Clock;
use crate::engine::settlement::SettlementEngine;
use crate::errors::EngineError;
use crate::ledger::store::LedgerStore;
use crate::ledger::types::{Round, RoundStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Drives round phase transitions on a fixed timer cadence.
pub struct RoundScheduler {
    store: Arc<dyn LedgerStore>,
    settings: Arc<dyn SettingsProvider>,
    settlement: Arc<SettlementEngine>,
    bus: Arc<BroadcastBus>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl RoundScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        settings: Arc<dyn SettingsProvider>,
        settlement: Arc<SettlementEngine>,
        bus: Arc<BroadcastBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            settings,
            settlement,
            bus,
            clock,
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the round loop. Idempotent: at most one loop instance runs per
    /// process; repeated calls return false and spawn nothing.
    pub fn spawn(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run_loop().await;
        });
        true
    }

    async fn run_loop(&self) {
        info!("round loop started");
        let mut backoff = INITIAL_BACKOFF;

        loop {
            // Settings unavailability suspends the loop, never kills it.
            let settings = match self.settings.current().await {
                Ok(settings) => {
                    backoff = INITIAL_BACKOFF;
                    settings
                }
                Err(e) => {
                    error!("cannot start round, settings unavailable: {}", e);
                    self.clock.sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            match self.run_round(&settings).await {
                Ok(()) => {
                    self.clock.sleep(settings.cooldown()).await;
                }
                Err(e) => {
                    error!("round aborted: {}", e);
                    self.clock.sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// One full round: start, betting window, close, reveal delay,
    /// settlement, completion broadcast.
    async fn run_round(&self, settings: &GameSettings) -> Result<(), EngineError> {
        let sequence = self.store.last_sequence().await? + 1;
        let round = Round::open(sequence, settings, self.clock.now());
        self.store.insert_round(round.clone()).await?;
        self.bus.set_snapshot(RoundSnapshot::of(&round)).await;
        self.bus.publish(GameEvent::RoundStarted {
            round_id: round.id,
            sequence,
            outcome_options: round.outcome_options.clone(),
        });
        info!(round = sequence, "round started");

        self.clock.sleep(settings.round_duration()).await;

        // From this commit instant the ledger rejects bets on this round.
        let round = self.store.close_round(round.id, self.clock.now()).await?;
        self.bus.set_snapshot(RoundSnapshot::of(&round)).await;
        self.bus.publish(GameEvent::RoundClosed {
            round_id: round.id,
            sequence,
        });
        info!(round = sequence, "round closed for betting");

        self.clock.sleep(settings.reveal_delay()).await;

        // Settle synchronously so observers never see completion before
        // payouts exist.
        match self.settlement.settle(round.id).await {
            Ok(report) => {
                self.bus
                    .set_snapshot(self.completed_snapshot(&round))
                    .await;
                self.bus.publish(GameEvent::RoundCompleted {
                    round_id: round.id,
                    winning_option: report.winning_option,
                    settled_bets: report.settled_bets,
                });
                info!(round = sequence, "round completed");
            }
            Err(e) => {
                error!(round = sequence, "settlement failed: {}", e);
                // The round may still have been completed with a drawn
                // option; if so, observers still get the completion event.
                if let Some(completed) = self.store.round(round.id).await? {
                    if completed.status == RoundStatus::Completed {
                        self.bus
                            .set_snapshot(RoundSnapshot::of(&completed))
                            .await;
                        self.bus.publish(GameEvent::RoundCompleted {
                            round_id: completed.id,
                            winning_option: completed.winning_option.unwrap_or_default(),
                            settled_bets: Vec::new(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn completed_snapshot(&self, round: &Round) -> RoundSnapshot {
        RoundSnapshot {
            round_id: round.id,
            sequence: round.sequence,
            status: RoundStatus::Completed,
            outcome_options: round.outcome_options.clone(),
        }
    }
}
