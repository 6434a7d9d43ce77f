//! Ledger store: the sole source of truth for accounts, rounds, and bets
//!
//! The trait exposes atomic read-modify-write operations; `commit_bet` and
//! `settle_bet` are the two indivisible units the whole engine's consistency
//! rests on. `MemoryLedger` implements them under one lock so closing a
//! round and placing a bet against it are mutually exclusive, and per-account
//! debit/credit operations are serialized with no lost updates.

use crate::errors::{BetError, LedgerError};
use crate::ledger::types::{Account, AccountId, Bet, BetOutcome, Round, RoundStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Atomic ledger operations consumed by the engine.
///
/// Implementable by a transactional database; the engine never caches
/// balances or round status across calls.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Record a newly opened round.
    async fn insert_round(&self, round: Round) -> Result<(), LedgerError>;

    async fn round(&self, id: Uuid) -> Result<Option<Round>, LedgerError>;

    /// Highest sequence number allocated so far (0 before the first round).
    async fn last_sequence(&self) -> Result<u64, LedgerError>;

    /// Transition a round Open -> Closed. From the commit instant onward,
    /// `commit_bet` rejects the round.
    async fn close_round(&self, id: Uuid, at: DateTime<Utc>) -> Result<Round, LedgerError>;

    /// Transition a round Closed -> Completed and record the winning option.
    /// Fails for a round that is Open or already Completed.
    async fn complete_round(
        &self,
        id: Uuid,
        winning_option: &str,
        at: DateTime<Utc>,
    ) -> Result<Round, LedgerError>;

    /// Atomically insert a bet and, when `debit` is set, subtract the stake
    /// from the account. Both happen or neither does. The round must be Open
    /// and the option a member of its snapshot at the commit instant.
    async fn commit_bet(&self, bet: Bet, debit: Option<u64>) -> Result<Bet, BetError>;

    /// Atomically record a bet's outcome exactly once and, when `credit` is
    /// set, add the payout to the account.
    async fn settle_bet(
        &self,
        bet_id: Uuid,
        outcome: BetOutcome,
        credit: Option<u64>,
    ) -> Result<Bet, LedgerError>;

    async fn bets_for_round(&self, round_id: Uuid) -> Result<Vec<Bet>, LedgerError>;

    async fn account(&self, id: &str) -> Result<Option<Account>, LedgerError>;

    async fn upsert_account(&self, account: Account) -> Result<(), LedgerError>;
}

#[derive(Default)]
struct LedgerState {
    rounds: HashMap<Uuid, Round>,
    bets: HashMap<Uuid, Bet>,
    round_bets: HashMap<Uuid, Vec<Uuid>>,
    accounts: HashMap<AccountId, Account>,
    last_sequence: u64,
}

/// In-memory ledger. One `RwLock` guards the whole state so every trait
/// operation is a single indivisible commit.
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LedgerState> {
        self.state.write().expect("ledger lock poisoned")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LedgerState> {
        self.state.read().expect("ledger lock poisoned")
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_round(&self, round: Round) -> Result<(), LedgerError> {
        let mut state = self.write();
        if round.sequence <= state.last_sequence {
            return Err(LedgerError::InvalidTransition(format!(
                "sequence {} already allocated (last: {})",
                round.sequence, state.last_sequence
            )));
        }
        state.last_sequence = round.sequence;
        state.round_bets.insert(round.id, Vec::new());
        state.rounds.insert(round.id, round);
        Ok(())
    }

    async fn round(&self, id: Uuid) -> Result<Option<Round>, LedgerError> {
        Ok(self.read().rounds.get(&id).cloned())
    }

    async fn last_sequence(&self) -> Result<u64, LedgerError> {
        Ok(self.read().last_sequence)
    }

    async fn close_round(&self, id: Uuid, at: DateTime<Utc>) -> Result<Round, LedgerError> {
        let mut state = self.write();
        let round = state.rounds.get_mut(&id).ok_or(LedgerError::RoundNotFound)?;
        if round.status != RoundStatus::Open {
            return Err(LedgerError::InvalidTransition(format!(
                "cannot close round in status {:?}",
                round.status
            )));
        }
        round.status = RoundStatus::Closed;
        round.closed_at = Some(at);
        Ok(round.clone())
    }

    async fn complete_round(
        &self,
        id: Uuid,
        winning_option: &str,
        at: DateTime<Utc>,
    ) -> Result<Round, LedgerError> {
        let mut state = self.write();
        let round = state.rounds.get_mut(&id).ok_or(LedgerError::RoundNotFound)?;
        if round.status != RoundStatus::Closed {
            return Err(LedgerError::InvalidTransition(format!(
                "cannot complete round in status {:?}",
                round.status
            )));
        }
        round.status = RoundStatus::Completed;
        round.winning_option = Some(winning_option.to_string());
        round.revealed_at = Some(at);
        Ok(round.clone())
    }

    async fn commit_bet(&self, bet: Bet, debit: Option<u64>) -> Result<Bet, BetError> {
        let mut state = self.write();

        // Round checks happen at the commit instant, under the same lock that
        // close_round takes: no bet can slip in after closure.
        let round = state
            .rounds
            .get(&bet.round_id)
            .ok_or(BetError::RoundNotFound)?;
        if !round.is_open() {
            return Err(BetError::RoundClosed);
        }
        if !round.outcome_options.contains(&bet.chosen_option) {
            return Err(BetError::UnknownOption(bet.chosen_option.clone()));
        }

        if let Some(amount) = debit {
            let account = state
                .accounts
                .get_mut(&bet.account_id)
                .ok_or(BetError::AccountNotFound)?;
            if account.balance < amount {
                return Err(BetError::InsufficientBalance);
            }
            account.balance -= amount;
        }

        state
            .round_bets
            .entry(bet.round_id)
            .or_default()
            .push(bet.id);
        state.bets.insert(bet.id, bet.clone());
        Ok(bet)
    }

    async fn settle_bet(
        &self,
        bet_id: Uuid,
        outcome: BetOutcome,
        credit: Option<u64>,
    ) -> Result<Bet, LedgerError> {
        let mut state = self.write();

        // Validate everything before mutating so the operation is all-or-nothing.
        let bet = state.bets.get(&bet_id).ok_or(LedgerError::BetNotFound)?;
        if bet.outcome.is_some() {
            return Err(LedgerError::AlreadySettled);
        }
        let account_id = bet.account_id.clone();
        if credit.is_some() && !state.accounts.contains_key(&account_id) {
            return Err(LedgerError::AccountNotFound);
        }

        if let Some(payout) = credit {
            let account = state
                .accounts
                .get_mut(&account_id)
                .expect("account existence checked above");
            account.balance = account.balance.saturating_add(payout);
        }
        let bet = state.bets.get_mut(&bet_id).expect("bet existence checked above");
        bet.outcome = Some(outcome);
        Ok(bet.clone())
    }

    async fn bets_for_round(&self, round_id: Uuid) -> Result<Vec<Bet>, LedgerError> {
        let state = self.read();
        let ids = state.round_bets.get(&round_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| state.bets.get(id).cloned())
            .collect())
    }

    async fn account(&self, id: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self.read().accounts.get(id).cloned())
    }

    async fn upsert_account(&self, account: Account) -> Result<(), LedgerError> {
        self.write().accounts.insert(account.id.clone(), account);
        Ok(())
    }
}
