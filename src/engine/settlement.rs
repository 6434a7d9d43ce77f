//! Round settlement: draw one winning option and credit winners exactly once.
//!
//! The round is marked Completed (with the drawn option) before any credit is
//! attempted, so a rescheduled settlement of the same round is a no-op and can
//! never double-credit. A single bet's credit failure is logged and counted
//! without aborting the rest of the pass.

use crate::engine::clock::Clock;
use crate::errors::SettlementError;
use crate::ledger::store::LedgerStore;
use crate::ledger::types::{Bet, BetOutcome, RoundStatus};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Source of the winning option. Pluggable: the default is a uniform draw;
/// a weighted draw honoring configured win ratios is a valid substitution as
/// long as exactly one option is chosen after close and before reveal.
pub trait OutcomeDrawer: Send + Sync {
    fn draw(&self, options: &[String]) -> Option<String>;
}

/// Uniformly random draw over the round's option snapshot.
pub struct UniformDrawer;

impl OutcomeDrawer for UniformDrawer {
    fn draw(&self, options: &[String]) -> Option<String> {
        options.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Result of one settlement pass.
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub round_id: Uuid,
    pub winning_option: String,
    /// Bets whose outcome was written during this pass, winners and losers.
    pub settled_bets: Vec<Bet>,
    /// Bets left unsettled for manual reconciliation.
    pub failed_bets: u64,
    /// True when the round was already Completed and nothing was mutated.
    pub already_settled: bool,
}

/// Settles closed rounds against the ledger. Payouts are priced from the
/// round's own settings snapshot, never from live settings.
pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    drawer: Arc<dyn OutcomeDrawer>,
    clock: Arc<dyn Clock>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        drawer: Arc<dyn OutcomeDrawer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            drawer,
            clock,
        }
    }

    /// Settle a closed round. Idempotent: re-invocation on a Completed round
    /// produces no account mutations.
    pub async fn settle(&self, round_id: Uuid) -> Result<SettlementReport, SettlementError> {
        let round = self
            .store
            .round(round_id)
            .await?
            .ok_or(SettlementError::RoundNotFound)?;

        match round.status {
            RoundStatus::Open => return Err(SettlementError::RoundStillOpen),
            RoundStatus::Completed => {
                info!(round = round.sequence, "settlement skipped: round already completed");
                return Ok(SettlementReport {
                    round_id,
                    winning_option: round.winning_option.unwrap_or_default(),
                    settled_bets: Vec::new(),
                    failed_bets: 0,
                    already_settled: true,
                });
            }
            RoundStatus::Closed => {}
        }

        let winning_option = self
            .drawer
            .draw(&round.outcome_options)
            .ok_or(SettlementError::NoOutcomeOptions)?;

        // Commit the result before crediting: a crash mid-pass leaves the
        // round Completed, and the next settle call is a no-op.
        let round = self
            .store
            .complete_round(round_id, &winning_option, self.clock.now())
            .await?;
        info!(round = round.sequence, winning = %winning_option, "round result drawn");

        let multiplier = round.multiplier(&winning_option);

        let mut settled_bets = Vec::new();
        let mut failed_bets = 0u64;

        for bet in self.store.bets_for_round(round_id).await? {
            if bet.outcome.is_some() {
                continue;
            }

            let (outcome, credit) = if bet.chosen_option == winning_option {
                let payout = bet.amount.saturating_mul(multiplier);
                let credit = (!bet.is_system).then_some(payout);
                (BetOutcome { won: true, payout }, credit)
            } else {
                (BetOutcome { won: false, payout: 0 }, None)
            };

            match self.store.settle_bet(bet.id, outcome, credit).await {
                Ok(settled) => settled_bets.push(settled),
                Err(e) => {
                    // Non-fatal: the bet stays unsettled for reconciliation.
                    error!(
                        bet_id = %bet.id,
                        account = %bet.account_id,
                        "settlement failed for bet: {}",
                        e
                    );
                    failed_bets += 1;
                }
            }
        }

        info!(
            round = round.sequence,
            settled = settled_bets.len(),
            failed = failed_bets,
            "payouts processed"
        );

        Ok(SettlementReport {
            round_id,
            winning_option,
            settled_bets,
            failed_bets,
            already_settled: false,
        })
    }
}
