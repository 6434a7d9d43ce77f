//! Connection gateway: admission control for inbound bet requests.
//!
//! Per-connection state (identity, rate-limit stamp, idempotency cache) is
//! owned by the connection's task and torn down on disconnect. Disconnecting
//! never cancels a ledger commit already issued; only this state is released.

use crate::api::auth::Identity;
use crate::errors::BetError;
use crate::ledger::bets::BetLedger;
use crate::ledger::types::{Bet, Role};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Inbound `place_bet` payload. Fields are optional so missing arguments are
/// reported as `InvalidRequest` rather than as a protocol error.
#[derive(Debug, Clone, Deserialize)]
pub struct BetRequest {
    pub request_id: Option<String>,
    pub round_id: Option<Uuid>,
    pub chosen_option: Option<String>,
    pub amount: Option<u64>,
}

/// Synchronous acknowledgment for every gateway request.
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet: Option<Bet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

impl Ack {
    pub fn accepted(bet: Bet) -> Self {
        Self {
            success: true,
            message: "bet placed".to_string(),
            code: None,
            bet: Some(bet),
            balance: None,
            duplicate: false,
        }
    }

    pub fn balance(balance: u64) -> Self {
        Self {
            success: true,
            message: "ok".to_string(),
            code: None,
            bet: None,
            balance: Some(balance),
            duplicate: false,
        }
    }

    pub fn rejected(err: &BetError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            code: Some(err.code().to_string()),
            bet: None,
            balance: None,
            duplicate: false,
        }
    }
}

/// State owned by one connection for its lifetime.
pub struct ConnectionState {
    pub identity: Option<Identity>,
    last_bet_at: Option<Instant>,
    /// Bounded request-id cache; replays the cached ack for duplicates.
    processed: LruCache<String, Ack>,
}

/// Shared admission-control service; one instance serves all connections.
pub struct ConnectionGateway {
    bets: Arc<BetLedger>,
    min_interval: Duration,
    cache_size: NonZeroUsize,
}

impl ConnectionGateway {
    pub fn new(bets: Arc<BetLedger>, min_interval: Duration, cache_size: usize) -> Self {
        Self {
            bets,
            min_interval,
            cache_size: NonZeroUsize::new(cache_size.max(1)).expect("max(1) is nonzero"),
        }
    }

    /// Fresh per-connection state; dropped on disconnect.
    pub fn new_connection(&self, identity: Option<Identity>) -> ConnectionState {
        ConnectionState {
            identity,
            last_bet_at: None,
            processed: LruCache::new(self.cache_size),
        }
    }

    /// Handle one `place_bet` request: auth gate, rate limit, idempotency,
    /// then the bet ledger. A request id is cached only for an accepted bet,
    /// so a genuine retry after a failure is not treated as a duplicate.
    pub async fn place_bet(&self, conn: &mut ConnectionState, request: BetRequest) -> Ack {
        let Some(identity) = conn.identity.clone() else {
            return Ack::rejected(&BetError::AuthenticationRequired);
        };

        let now = Instant::now();
        if let Some(last) = conn.last_bet_at {
            if now.duration_since(last) < self.min_interval {
                return Ack::rejected(&BetError::TooManyRequests);
            }
        }
        conn.last_bet_at = Some(now);

        if let Some(request_id) = &request.request_id {
            if let Some(cached) = conn.processed.get(request_id) {
                let mut ack = cached.clone();
                ack.duplicate = true;
                ack.message = "duplicate request (ignored)".to_string();
                return ack;
            }
        }

        let (round_id, chosen_option, amount) =
            match (request.round_id, request.chosen_option, request.amount) {
                (Some(round_id), Some(option), Some(amount)) if amount > 0 => {
                    (round_id, option, amount)
                }
                _ => {
                    return Ack::rejected(&BetError::InvalidRequest(
                        "round_id, chosen_option and a positive amount are required".to_string(),
                    ))
                }
            };

        let is_system = identity.role == Role::Bot;
        match self
            .bets
            .place_bet(&identity.subject_id, round_id, &chosen_option, amount, is_system)
            .await
        {
            Ok(bet) => {
                let ack = Ack::accepted(bet);
                if let Some(request_id) = request.request_id {
                    conn.processed.put(request_id, ack.clone());
                }
                ack
            }
            Err(err) => Ack::rejected(&err),
        }
    }

    /// Handle a `get_balance` request.
    pub async fn balance(&self, conn: &ConnectionState) -> Ack {
        let Some(identity) = &conn.identity else {
            return Ack::rejected(&BetError::AuthenticationRequired);
        };
        Ack::balance(self.bets.balance(&identity.subject_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameSettings, StaticSettingsProvider};
    use crate::ledger::store::{LedgerStore, MemoryLedger};
    use crate::ledger::types::{Account, Round};
    use chrono::Utc;
    use tokio::time::{advance, Duration as TokioDuration};

    struct Fixture {
        gateway: ConnectionGateway,
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
                id: "player-0001".to_string(),
                balance: 1_000,
                role: Role::Player,
            })
            .await
            .unwrap();
        let round = Round::open(1, &settings, Utc::now());
        store.insert_round(round.clone()).await.unwrap();

        let bets = Arc::new(BetLedger::new(
            store.clone(),
            Arc::new(StaticSettingsProvider::new(settings)),
        ));
        Fixture {
            gateway: ConnectionGateway::new(bets, Duration::from_millis(200), 64),
            store,
            round,
        }
    }

    fn player_identity() -> Identity {
        Identity {
            subject_id: "player-0001".to_string(),
            role: Role::Player,
        }
    }

    fn bet_request(round_id: Uuid, request_id: Option<&str>) -> BetRequest {
        BetRequest {
            request_id: request_id.map(String::from),
            round_id: Some(round_id),
            chosen_option: Some("A".to_string()),
            amount: Some(50),
        }
    }

    #[tokio::test]
    async fn test_guest_cannot_place_bet() {
        let f = fixture().await;
        let mut conn = f.gateway.new_connection(None);
        let ack = f.gateway.place_bet(&mut conn, bet_request(f.round.id, None)).await;
        assert!(!ack.success);
        assert_eq!(ack.code.as_deref(), Some("AUTHENTICATION_REQUIRED"));
    }

    #[tokio::test]
    async fn test_guest_cannot_read_balance() {
        let f = fixture().await;
        let conn = f.gateway.new_connection(None);
        let ack = f.gateway.balance(&conn).await;
        assert_eq!(ack.code.as_deref(), Some("AUTHENTICATION_REQUIRED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_rejects_rapid_requests() {
        let f = fixture().await;
        let mut conn = f.gateway.new_connection(Some(player_identity()));

        let first = f.gateway.place_bet(&mut conn, bet_request(f.round.id, None)).await;
        assert!(first.success);

        let second = f.gateway.place_bet(&mut conn, bet_request(f.round.id, None)).await;
        assert_eq!(second.code.as_deref(), Some("TOO_MANY_REQUESTS"));

        // and after the window passes, requests flow again
        advance(TokioDuration::from_millis(250)).await;
        let third = f.gateway.place_bet(&mut conn, bet_request(f.round.id, None)).await;
        assert!(third.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_per_connection() {
        let f = fixture().await;
        let mut conn_a = f.gateway.new_connection(Some(player_identity()));
        let mut conn_b = f.gateway.new_connection(Some(player_identity()));

        let a = f.gateway.place_bet(&mut conn_a, bet_request(f.round.id, None)).await;
        let b = f.gateway.place_bet(&mut conn_b, bet_request(f.round.id, None)).await;
        assert!(a.success);
        assert!(b.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_request_id_replays_ack_without_second_bet() {
        let f = fixture().await;
        let mut conn = f.gateway.new_connection(Some(player_identity()));

        let first = f
            .gateway
            .place_bet(&mut conn, bet_request(f.round.id, Some("req-1")))
            .await;
        assert!(first.success);
        let bet_id = first.bet.as_ref().unwrap().id;

        advance(TokioDuration::from_millis(250)).await;
        let replay = f
            .gateway
            .place_bet(&mut conn, bet_request(f.round.id, Some("req-1")))
            .await;
        assert!(replay.success);
        assert!(replay.duplicate);
        assert_eq!(replay.bet.as_ref().unwrap().id, bet_id);

        // exactly one committed bet, one debit
        assert_eq!(f.store.bets_for_round(f.round.id).await.unwrap().len(), 1);
        let balance = f.store.account("player-0001").await.unwrap().unwrap().balance;
        assert_eq!(balance, 950);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_placement_releases_request_id() {
        let f = fixture().await;
        let mut conn = f.gateway.new_connection(Some(player_identity()));

        // first attempt fails on a closed round
        f.store.close_round(f.round.id, Utc::now()).await.unwrap();
        let failed = f
            .gateway
            .place_bet(&mut conn, bet_request(f.round.id, Some("req-2")))
            .await;
        assert_eq!(failed.code.as_deref(), Some("ROUND_CLOSED"));

        // a new round opens; the genuine retry with the same id must not be
        // treated as a duplicate
        let next = Round::open(
            2,
            &GameSettings {
                outcome_options: vec!["A".to_string(), "B".to_string()],
                ..GameSettings::default()
            },
            Utc::now(),
        );
        f.store.insert_round(next.clone()).await.unwrap();

        advance(TokioDuration::from_millis(250)).await;
        let retry = f
            .gateway
            .place_bet(&mut conn, bet_request(next.id, Some("req-2")))
            .await;
        assert!(retry.success);
        assert!(!retry.duplicate);
    }

    #[tokio::test]
    async fn test_missing_fields_rejected_as_invalid_request() {
        let f = fixture().await;
        let mut conn = f.gateway.new_connection(Some(player_identity()));
        let ack = f
            .gateway
            .place_bet(
                &mut conn,
                BetRequest {
                    request_id: None,
                    round_id: None,
                    chosen_option: Some("A".to_string()),
                    amount: Some(50),
                },
            )
            .await;
        assert_eq!(ack.code.as_deref(), Some("INVALID_REQUEST"));
    }

    #[tokio::test]
    async fn test_bot_identity_places_system_bet() {
        let f = fixture().await;
        let mut conn = f.gateway.new_connection(Some(Identity {
            subject_id: "bot-0001".to_string(),
            role: Role::Bot,
        }));
        let ack = f.gateway.place_bet(&mut conn, bet_request(f.round.id, None)).await;
        assert!(ack.success, "bot bet rejected: {}", ack.message);
        assert!(ack.bet.unwrap().is_system);
    }

    #[tokio::test]
    async fn test_balance_for_authenticated_connection() {
        let f = fixture().await;
        let conn = f.gateway.new_connection(Some(player_identity()));
        let ack = f.gateway.balance(&conn).await;
        assert!(ack.success);
        assert_eq!(ack.balance, Some(1_000));
    }
}
