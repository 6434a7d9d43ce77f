//! Bet placement: validation pipeline plus the atomic debit+insert commit.

use crate::config::SettingsProvider;
use crate::errors::BetError;
use crate::ledger::store::LedgerStore;
use crate::ledger::types::{AccountId, Bet};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Validates and atomically records a single stake against a round and an
/// account balance.
pub struct BetLedger {
    store: Arc<dyn LedgerStore>,
    settings: Arc<dyn SettingsProvider>,
}

impl BetLedger {
    pub fn new(store: Arc<dyn LedgerStore>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self { store, settings }
    }

    /// Place a bet. Validation order is fixed; each failure is a distinct
    /// [`BetError`] kind. The debit and the bet insert commit as one unit at
    /// the ledger, where the round's Open status is re-checked at the commit
    /// instant. System-generated bets skip the debit but nothing else.
    pub async fn place_bet(
        &self,
        account_id: &str,
        round_id: Uuid,
        chosen_option: &str,
        amount: u64,
        is_system: bool,
    ) -> Result<Bet, BetError> {
        if account_id.is_empty() {
            return Err(BetError::InvalidRequest("missing account id".to_string()));
        }
        if chosen_option.is_empty() {
            return Err(BetError::InvalidRequest("missing option".to_string()));
        }
        if amount == 0 {
            return Err(BetError::InvalidRequest("amount must be positive".to_string()));
        }

        let settings = self
            .settings
            .current()
            .await
            .map_err(|e| BetError::InvalidRequest(e.to_string()))?;

        if !settings.outcome_options.iter().any(|o| o == chosen_option) {
            return Err(BetError::UnknownOption(chosen_option.to_string()));
        }
        if amount < settings.min_bet || amount > settings.max_bet {
            return Err(BetError::StakeOutOfRange {
                amount,
                min: settings.min_bet,
                max: settings.max_bet,
            });
        }

        let bet = Bet::new(
            AccountId::from(account_id),
            round_id,
            chosen_option.to_string(),
            amount,
            is_system,
            Utc::now(),
        );
        let debit = (!is_system).then_some(amount);

        let bet = self.store.commit_bet(bet, debit).await?;
        debug!(
            bet_id = %bet.id,
            account = %bet.account_id,
            option = %bet.chosen_option,
            amount = bet.amount,
            system = bet.is_system,
            "bet committed"
        );
        Ok(bet)
    }

    /// Current balance for an account, zero if it is unknown.
    pub async fn balance(&self, account_id: &str) -> u64 {
        self.store
            .account(account_id)
            .await
            .ok()
            .flatten()
            .map(|a| a.balance)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameSettings, StaticSettingsProvider};
    use crate::ledger::store::MemoryLedger;
    use crate::ledger::types::{Account, Role, Round};

    struct Fixture {
        bets: BetLedger,
        store: Arc<MemoryLedger>,
        round: Round,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedger::new());
        let settings = GameSettings {
            min_bet: 10,
            max_bet: 1_000,
            outcome_options: vec!["A".to_string(), "B".to_string()],
            ..GameSettings::default()
        };
        store
            .upsert_account(Account {
                id: "acct".to_string(),
                balance: 100,
                role: Role::Player,
            })
            .await
            .unwrap();

        let round = Round::open(1, &settings, Utc::now());
        store.insert_round(round.clone()).await.unwrap();

        let provider = Arc::new(StaticSettingsProvider::new(settings));
        Fixture {
            bets: BetLedger::new(store.clone(), provider),
            store,
            round,
        }
    }

    #[tokio::test]
    async fn test_accepted_bet_debits_balance() {
        let f = fixture().await;
        let bet = f
            .bets
            .place_bet("acct", f.round.id, "A", 50, false)
            .await
            .expect("placement failed");

        assert_eq!(bet.amount, 50);
        assert!(bet.outcome.is_none());
        assert_eq!(f.bets.balance("acct").await, 50);
    }

    #[tokio::test]
    async fn test_unknown_option_rejected_balance_unchanged() {
        let f = fixture().await;
        let err = f
            .bets
            .place_bet("acct", f.round.id, "C", 50, false)
            .await
            .unwrap_err();
        assert_eq!(err, BetError::UnknownOption("C".to_string()));
        assert_eq!(f.bets.balance("acct").await, 100);
    }

    #[tokio::test]
    async fn test_stake_bounds_enforced() {
        let f = fixture().await;
        let err = f
            .bets
            .place_bet("acct", f.round.id, "A", 5, false)
            .await
            .unwrap_err();
        assert_eq!(err, BetError::StakeOutOfRange { amount: 5, min: 10, max: 1_000 });

        let err = f
            .bets
            .place_bet("acct", f.round.id, "A", 2_000, false)
            .await
            .unwrap_err();
        assert!(matches!(err, BetError::StakeOutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_zero_amount_is_invalid_request() {
        let f = fixture().await;
        let err = f
            .bets
            .place_bet("acct", f.round.id, "A", 0, false)
            .await
            .unwrap_err();
        assert!(matches!(err, BetError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_round_rejected() {
        let f = fixture().await;
        let err = f
            .bets
            .place_bet("acct", Uuid::new_v4(), "A", 50, false)
            .await
            .unwrap_err();
        assert_eq!(err, BetError::RoundNotFound);
    }

    #[tokio::test]
    async fn test_closed_round_rejected() {
        let f = fixture().await;
        f.store.close_round(f.round.id, Utc::now()).await.unwrap();

        let err = f
            .bets
            .place_bet("acct", f.round.id, "A", 50, false)
            .await
            .unwrap_err();
        assert_eq!(err, BetError::RoundClosed);
        assert_eq!(f.bets.balance("acct").await, 100);
    }

    #[tokio::test]
    async fn test_system_bet_skips_debit_but_not_round_checks() {
        let f = fixture().await;
        let bet = f
            .bets
            .place_bet("bot-1", f.round.id, "B", 50, true)
            .await
            .expect("system bet failed");
        assert!(bet.is_system);

        f.store.close_round(f.round.id, Utc::now()).await.unwrap();
        let err = f
            .bets
            .place_bet("bot-1", f.round.id, "B", 50, true)
            .await
            .unwrap_err();
        assert_eq!(err, BetError::RoundClosed);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let f = fixture().await;
        let err = f
            .bets
            .place_bet("acct", f.round.id, "A", 500, false)
            .await
            .unwrap_err();
        assert_eq!(err, BetError::InsufficientBalance);
        assert_eq!(f.bets.balance("acct").await, 100);
    }

    #[tokio::test]
    async fn test_unknown_account_balance_is_zero() {
        let f = fixture().await;
        assert_eq!(f.bets.balance("nobody").await, 0);
    }
}
