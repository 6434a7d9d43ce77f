//! WebSocket endpoint for real-time round and bet traffic.
//!
//! Each connection authenticates once at upgrade time, immediately receives
//! the current round's snapshot, and then runs a single task that multiplexes
//! inbound requests with outbound broadcasts. All per-connection gateway
//! state lives in this task and is dropped on disconnect.

use super::auth::mask_subject;
use super::gateway::{Ack, BetRequest, ConnectionState};
use super::server::AppState;
use crate::bus::{GameEvent, RoundSnapshot, ACTIVITY_ROOM};
use crate::ledger::types::Bet;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Requests a client can send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientRequest {
    Join {
        room: Option<String>,
    },
    PlaceBet {
        request_id: Option<String>,
        round_id: Option<uuid::Uuid>,
        chosen_option: Option<String>,
        amount: Option<u64>,
    },
    GetBalance {},
}

/// Messages sent to one connection only; broadcasts use [`GameEvent`].
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum Direct<'a> {
    #[serde(rename = "ack")]
    Ack(&'a Ack),
    #[serde(rename = "round.snapshot")]
    Snapshot(&'a RoundSnapshot),
    #[serde(rename = "bet_accepted")]
    BetAccepted { bet: &'a Bet },
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Connect-time credential; absent or invalid means guest.
    pub token: Option<String>,
}

/// WebSocket upgrade handler: `GET /ws?token=...`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(state, socket, params.token))
}

async fn handle_connection(state: Arc<AppState>, socket: WebSocket, token: Option<String>) {
    let identity = match token {
        Some(token) => state.validator.validate(&token).await,
        None => None,
    };
    let connection_id = state.bus.register();
    info!(
        connection = connection_id,
        total = state.bus.connection_count(),
        "websocket client connected {}",
        if identity.is_some() { "(auth)" } else { "(guest)" }
    );

    let mut conn = state.gateway.new_connection(identity);
    // every observer starts on the public activity feed; `join` adds more
    let mut joined_rooms: HashSet<String> = HashSet::from([ACTIVITY_ROOM.to_string()]);
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.bus.subscribe();

    // Late joiner replay: the current round is delivered before any event.
    if let Some(snapshot) = state.bus.snapshot().await {
        if send_json(&mut sender, &Direct::Snapshot(&snapshot)).await.is_err() {
            state.bus.unregister();
            return;
        }
    }

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if handle_request(&state, &mut conn, &mut joined_rooms, &mut sender, &text)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection = connection_id, "client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection = connection_id, "websocket error: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(envelope) => {
                        if !envelope.matches(&joined_rooms) {
                            continue;
                        }
                        if send_json(&mut sender, &envelope.event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(connection = connection_id, missed, "observer lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // Disconnect releases only gateway/bus state; committed bets stay.
    state.bus.unregister();
    info!(
        connection = connection_id,
        remaining = state.bus.connection_count(),
        "websocket client disconnected"
    );
}

/// Dispatch one inbound request and send its acknowledgment.
async fn handle_request(
    state: &Arc<AppState>,
    conn: &mut ConnectionState,
    joined_rooms: &mut HashSet<String>,
    sender: &mut (impl SinkExt<Message> + Unpin),
    text: &str,
) -> Result<(), ()> {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            let ack = Ack {
                success: false,
                message: format!("invalid payload: {}", e),
                code: Some("INVALID_REQUEST".to_string()),
                bet: None,
                balance: None,
                duplicate: false,
            };
            return send_json(sender, &Direct::Ack(&ack)).await;
        }
    };

    match request {
        ClientRequest::Join { room } => {
            if let Some(room) = room {
                debug!(room = %room, "connection joined room");
                joined_rooms.insert(room);
            }
            Ok(())
        }
        ClientRequest::PlaceBet { request_id, round_id, chosen_option, amount } => {
            let ack = state
                .gateway
                .place_bet(
                    conn,
                    BetRequest { request_id, round_id, chosen_option, amount },
                )
                .await;

            if !ack.duplicate {
                if let Some(bet) = ack.bet.as_ref() {
                    // private confirmation to the bettor, anonymized copy
                    // to everyone on the activity feed
                    send_json(sender, &Direct::BetAccepted { bet }).await?;
                    state.bus.publish_to_room(
                        ACTIVITY_ROOM,
                        GameEvent::PublicBet {
                            masked_subject: mask_subject(&bet.account_id),
                            chosen_option: bet.chosen_option.clone(),
                            amount: bet.amount,
                            is_system: bet.is_system,
                        },
                    );
                }
            }
            send_json(sender, &Direct::Ack(&ack)).await
        }
        ClientRequest::GetBalance {} => {
            let ack = state.gateway.balance(conn).await;
            send_json(sender, &Direct::Ack(&ack)).await
        }
    }
}

async fn send_json<T: Serialize>(
    sender: &mut (impl SinkExt<Message> + Unpin),
    value: &T,
) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|_| ())?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::{Identity, StaticTokenValidator};
    use crate::api::gateway::ConnectionGateway;
    use crate::bus::BroadcastBus;
    use crate::config::{AuthConfig, GameSettings, StaticSettingsProvider};
    use crate::ledger::store::{LedgerStore, MemoryLedger};
    use crate::ledger::types::{Account, Role, Round};
    use chrono::Utc;
    use futures_util::Sink;
    use std::collections::HashMap;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Sink that records every frame instead of writing to a socket.
    #[derive(Default)]
    struct CollectSink(Vec<Message>);

    impl Sink<Message> for CollectSink {
        type Error = std::convert::Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.get_mut().0.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn frame_json(message: &Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(text).expect("frame is not json"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    async fn fan_out_state() -> (Arc<AppState>, Round) {
        let store = Arc::new(MemoryLedger::new());
        let settings = GameSettings {
            min_bet: 10,
            max_bet: 1_000,
            outcome_options: vec!["A".to_string(), "B".to_string()],
            payout_multipliers: HashMap::from([("A".to_string(), 2)]),
            ..GameSettings::default()
        };
        let round = Round::open(1, &settings, Utc::now());
        store.insert_round(round.clone()).await.unwrap();
        store
            .upsert_account(Account {
                id: "alice-wagers-99".to_string(),
                balance: 500,
                role: Role::Player,
            })
            .await
            .unwrap();

        let bets = Arc::new(crate::ledger::BetLedger::new(
            store.clone(),
            Arc::new(StaticSettingsProvider::new(settings)),
        ));
        let state = Arc::new(AppState {
            gateway: Arc::new(ConnectionGateway::new(bets, Duration::from_millis(0), 16)),
            bus: Arc::new(BroadcastBus::new(16)),
            validator: Arc::new(StaticTokenValidator::from_config(&AuthConfig::default())),
        });
        (state, round)
    }

    #[tokio::test]
    async fn test_accepted_bet_fans_out_private_and_masked_public() {
        let (state, round) = fan_out_state().await;
        let mut events = state.bus.subscribe();
        let mut conn = state.gateway.new_connection(Some(Identity {
            subject_id: "alice-wagers-99".to_string(),
            role: Role::Player,
        }));
        let mut rooms: HashSet<String> = HashSet::from([ACTIVITY_ROOM.to_string()]);
        let mut sink = CollectSink::default();

        let text = format!(
            r#"{{"type":"place_bet","request_id":"req-7","round_id":"{}","chosen_option":"A","amount":50}}"#,
            round.id
        );
        handle_request(&state, &mut conn, &mut rooms, &mut sink, &text)
            .await
            .unwrap();

        // exactly one anonymized copy on the activity feed
        let envelope = events.try_recv().expect("no public bet broadcast");
        assert_eq!(envelope.room.as_deref(), Some(ACTIVITY_ROOM));
        assert!(envelope.matches(&rooms));
        match envelope.event {
            GameEvent::PublicBet { masked_subject, chosen_option, amount, is_system } => {
                assert_eq!(masked_subject, "alic...-99");
                assert_eq!(chosen_option, "A");
                assert_eq!(amount, 50);
                assert!(!is_system);
            }
            other => panic!("expected public_bet, got {:?}", other),
        }
        assert!(events.try_recv().is_err());

        // private confirmation precedes the ack on the bettor's socket
        assert_eq!(sink.0.len(), 2);
        assert_eq!(frame_json(&sink.0[0])["type"], "bet_accepted");
        let ack = frame_json(&sink.0[1]);
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["success"], true);
    }

    #[tokio::test]
    async fn test_duplicate_replay_emits_no_public_bet() {
        let (state, round) = fan_out_state().await;
        let mut events = state.bus.subscribe();
        let mut conn = state.gateway.new_connection(Some(Identity {
            subject_id: "alice-wagers-99".to_string(),
            role: Role::Player,
        }));
        let mut rooms: HashSet<String> = HashSet::from([ACTIVITY_ROOM.to_string()]);
        let mut sink = CollectSink::default();

        let text = format!(
            r#"{{"type":"place_bet","request_id":"req-7","round_id":"{}","chosen_option":"A","amount":50}}"#,
            round.id
        );
        handle_request(&state, &mut conn, &mut rooms, &mut sink, &text)
            .await
            .unwrap();
        events.try_recv().expect("first placement must broadcast");

        // retransmission after a dropped ack: ack only, no second fan-out
        handle_request(&state, &mut conn, &mut rooms, &mut sink, &text)
            .await
            .unwrap();
        assert!(events.try_recv().is_err());
        assert_eq!(sink.0.len(), 3);
        let replay = frame_json(&sink.0[2]);
        assert_eq!(replay["type"], "ack");
        assert_eq!(replay["success"], true);
        assert_eq!(replay["duplicate"], true);
    }

    #[test]
    fn test_client_request_wire_format() {
        let request: ClientRequest = serde_json::from_str(
            r#"{"type":"place_bet","request_id":"r1","round_id":"67e55044-10b1-426f-9247-bb680e5fe0c8","chosen_option":"5x","amount":100}"#,
        )
        .expect("parse failed");
        match request {
            ClientRequest::PlaceBet { request_id, amount, .. } => {
                assert_eq!(request_id.as_deref(), Some("r1"));
                assert_eq!(amount, Some(100));
            }
            other => panic!("unexpected request: {:?}", other),
        }

        assert!(serde_json::from_str::<ClientRequest>(r#"{"type":"get_balance"}"#).is_ok());
        assert!(serde_json::from_str::<ClientRequest>(r#"{"type":"join","room":"lobby"}"#).is_ok());
    }

    #[test]
    fn test_direct_message_tags() {
        let ack = Ack {
            success: true,
            message: "ok".to_string(),
            code: None,
            bet: None,
            balance: Some(10),
            duplicate: false,
        };
        let json = serde_json::to_value(Direct::Ack(&ack)).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["balance"], 10);
        assert!(json.get("duplicate").is_none());
    }
}
