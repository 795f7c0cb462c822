//! Outbound room events
//!
//! One broadcast channel per room plus a global channel. Publishing is
//! fire-and-forget: the engine never blocks or retries on transport failure, and a
//! send with no subscribers is not an error.

use crate::room::types::{PayoutRecord, Room, Round, Seat};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

/// Events pushed to the transport collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// Full room snapshot after any state-relevant change.
    RoomUpdate { room: Room },

    /// Game start announcement: the fairness window and fixed turn order.
    GameStart {
        room_id: String,
        lock_height: u64,
        settlement_block_height: u64,
        server_commit: String,
        turn_order: Vec<u32>,
        seats: Vec<Seat>,
    },

    /// It is now this seat's turn to pull.
    TurnStart {
        room_id: String,
        seat_index: u32,
        wallet_address: Option<String>,
        round_index: u32,
    },

    /// Outcome of one pull.
    RoundResult {
        room_id: String,
        round: Round,
        alive: Vec<u32>,
        dead: Vec<u32>,
    },

    /// Game over: survivors and their payouts.
    GameEnd {
        room_id: String,
        survivors: Vec<u32>,
        payouts: Vec<PayoutRecord>,
        payout_tx_id: Option<String>,
    },

    /// Everything needed to independently verify the game after settlement.
    FairnessReveal {
        room_id: String,
        server_seed: String,
        client_seeds: Vec<String>,
        block_hash: String,
        rounds: Vec<Round>,
    },

    /// A player left mid-game and forfeited their seat.
    PlayerForfeit {
        room_id: String,
        seat_index: u32,
        wallet_address: Option<String>,
    },

    /// The room was aborted; refunds for confirmed seats were attempted.
    RoomAborted { room_id: String, reason: String },
}

impl RoomEvent {
    pub fn room_id(&self) -> &str {
        match self {
            RoomEvent::RoomUpdate { room } => &room.id,
            RoomEvent::GameStart { room_id, .. }
            | RoomEvent::TurnStart { room_id, .. }
            | RoomEvent::RoundResult { room_id, .. }
            | RoomEvent::GameEnd { room_id, .. }
            | RoomEvent::FairnessReveal { room_id, .. }
            | RoomEvent::PlayerForfeit { room_id, .. }
            | RoomEvent::RoomAborted { room_id, .. } => room_id,
        }
    }
}

/// Fan-out hub: room-scoped channels created lazily, torn down when a room
/// reaches a terminal state.
pub struct EventBus {
    rooms: DashMap<String, broadcast::Sender<RoomEvent>>,
    global: broadcast::Sender<RoomEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (global, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            rooms: DashMap::new(),
            global,
        }
    }

    /// Publish to the room channel (if any subscriber ever asked for it) and the
    /// global channel. Send errors mean no live subscribers and are ignored.
    pub fn publish(&self, event: RoomEvent) {
        debug!(room_id = event.room_id(), "publishing event");
        if let Some(sender) = self.rooms.get(event.room_id()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.global.send(event);
    }

    pub fn subscribe_room(&self, room_id: &str) -> broadcast::Receiver<RoomEvent> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<RoomEvent> {
        self.global.subscribe()
    }

    /// Drop a terminal room's channel.
    pub fn close_room(&self, room_id: &str) {
        self.rooms.remove(room_id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
