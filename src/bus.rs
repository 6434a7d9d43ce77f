//! Broadcast bus for real-time round and bet events
//!
//! Fans lifecycle and bet events out to every connected observer over a
//! `tokio::sync::broadcast` channel, and keeps a current-round snapshot so a
//! late joiner never observes a stale or missing round. Delivery is
//! best-effort: a lagging or dropped receiver never affects ledger state.

use crate::ledger::types::{Bet, Round, RoundStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Room carrying the anonymized bet activity feed. Every connection is
/// subscribed to it on connect, so the feed reaches all observers.
pub const ACTIVITY_ROOM: &str = "bets";

/// Broadcast event types, tagged for the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameEvent {
    #[serde(rename = "round.started")]
    RoundStarted {
        round_id: Uuid,
        sequence: u64,
        outcome_options: Vec<String>,
    },

    #[serde(rename = "round.closed")]
    RoundClosed { round_id: Uuid, sequence: u64 },

    #[serde(rename = "round.completed")]
    RoundCompleted {
        round_id: Uuid,
        winning_option: String,
        settled_bets: Vec<Bet>,
    },

    /// Anonymized bet activity for observer displays.
    #[serde(rename = "public_bet")]
    PublicBet {
        masked_subject: String,
        chosen_option: String,
        amount: u64,
        is_system: bool,
    },
}

/// Envelope routing an event to the game channel (`room: None`) or to a
/// named room clients joined explicitly.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub room: Option<String>,
    pub event: GameEvent,
}

impl Envelope {
    /// Should a connection subscribed to `rooms` receive this envelope?
    pub fn matches(&self, rooms: &HashSet<String>) -> bool {
        match &self.room {
            None => true,
            Some(room) => rooms.contains(room),
        }
    }
}

/// Current-round state replayed to newly joined observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: Uuid,
    pub sequence: u64,
    pub status: RoundStatus,
    pub outcome_options: Vec<String>,
}

impl RoundSnapshot {
    pub fn of(round: &Round) -> Self {
        Self {
            round_id: round.id,
            sequence: round.sequence,
            status: round.status,
            outcome_options: round.outcome_options.clone(),
        }
    }
}

/// Fan-out hub shared by the scheduler and every connection task.
pub struct BroadcastBus {
    tx: broadcast::Sender<Envelope>,
    current_round: RwLock<Option<RoundSnapshot>>,
    active_connections: AtomicUsize,
    next_connection_id: AtomicU64,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            current_round: RwLock::new(None),
            active_connections: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Publish to the shared game channel.
    pub fn publish(&self, event: GameEvent) {
        self.send(Envelope { room: None, event });
    }

    /// Publish to one named room only.
    pub fn publish_to_room(&self, room: &str, event: GameEvent) {
        self.send(Envelope {
            room: Some(room.to_string()),
            event,
        });
    }

    fn send(&self, envelope: Envelope) {
        if let Err(e) = self.tx.send(envelope) {
            debug!("no observers to receive event: {}", e);
        }
    }

    /// Record the current round's snapshot; called by the scheduler at every
    /// phase transition.
    pub async fn set_snapshot(&self, snapshot: RoundSnapshot) {
        *self.current_round.write().await = Some(snapshot);
    }

    pub async fn snapshot(&self) -> Option<RoundSnapshot> {
        self.current_round.read().await.clone()
    }

    /// Register a connection; returns a process-unique id for log lines.
    pub fn register(&self) -> u64 {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        self.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn unregister(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
