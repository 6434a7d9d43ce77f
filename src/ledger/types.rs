//! Core domain types: rounds, bets, accounts.

use crate::config::GameSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type AccountId = String;

/// Lifecycle phase of a round. Transitions only run forward:
/// Open -> Closed -> Completed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Open,
    Closed,
    Completed,
}

/// One timed betting cycle. Append-only: rounds are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    /// Strictly increasing, 1-based.
    pub sequence: u64,
    pub status: RoundStatus,
    /// Settings snapshot taken at round start; immutable afterwards.
    pub outcome_options: Vec<String>,
    /// Payout multipliers frozen with the option set. A settings edit made
    /// while this round runs affects only future rounds.
    pub payout_multipliers: HashMap<String, u64>,
    /// Multiplier for options absent from `payout_multipliers`.
    pub fallback_multiplier: u64,
    /// Set exactly when `status` reaches Completed, never before.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_option: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<DateTime<Utc>>,
}

impl Round {
    /// Create a freshly opened round, snapshotting the settings that govern
    /// it for its whole lifetime.
    pub fn open(sequence: u64, settings: &GameSettings, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            status: RoundStatus::Open,
            outcome_options: settings.outcome_options.clone(),
            payout_multipliers: settings.payout_multipliers.clone(),
            fallback_multiplier: settings.fallback_multiplier,
            winning_option: None,
            started_at,
            closed_at: None,
            revealed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == RoundStatus::Open
    }

    /// Payout multiplier for an option, from this round's frozen snapshot.
    pub fn multiplier(&self, option: &str) -> u64 {
        self.payout_multipliers
            .get(option)
            .copied()
            .unwrap_or(self.fallback_multiplier)
    }
}

/// Settlement result recorded on a bet, written exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetOutcome {
    pub won: bool,
    /// Credited amount in minor units; zero for losing bets.
    pub payout: u64,
}

/// One account's stake on one outcome option within one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub account_id: AccountId,
    pub round_id: Uuid,
    pub chosen_option: String,
    /// Stake in minor units; positive and within bounds at placement.
    pub amount: u64,
    /// System-generated (bot) bets skip the balance debit and credit.
    pub is_system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BetOutcome>,
    pub created_at: DateTime<Utc>,
}

impl Bet {
    pub fn new(
        account_id: AccountId,
        round_id: Uuid,
        chosen_option: String,
        amount: u64,
        is_system: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            round_id,
            chosen_option,
            amount,
            is_system,
            outcome: None,
            created_at,
        }
    }
}

/// Account role; drives system-bet detection and feed masking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Bot,
    Admin,
}

/// Account as seen by the core: balance in non-negative minor units.
/// Registration and profile data live in the external account system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: u64,
    pub role: Role,
}
