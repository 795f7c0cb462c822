//! Room aggregate: rooms, seats, rounds, and money-movement records
//!
//! All monetary fields are integer sub-units of the payment asset. Floating point
//! never touches money.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Game mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomMode {
    /// Single-elimination: the first death ends the game.
    Regular,
    /// Last-survivor: play continues until one seat remains alive.
    Extreme,
}

impl RoomMode {
    /// Chamber/bullet layout for `player_count` players.
    ///
    /// REGULAR is one shared six-chamber revolver with a single bullet, so every
    /// pull is a uniform 1-in-6. EXTREME scales both chambers and bullets with the
    /// player count.
    pub fn chamber_layout(&self, player_count: usize) -> (usize, usize) {
        match self {
            RoomMode::Regular => (6, 1),
            RoomMode::Extreme => (3 * player_count, player_count.saturating_sub(1).max(1)),
        }
    }
}

impl fmt::Display for RoomMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomMode::Regular => write!(f, "REGULAR"),
            RoomMode::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Room lifecycle states.
///
/// `Lobby → Funding → Locked → Playing → {Settled | Aborted}`; `Aborted` is
/// reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomState {
    Lobby,
    Funding,
    Locked,
    Playing,
    Settled,
    Aborted,
}

impl RoomState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoomState::Settled | RoomState::Aborted)
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoomState::Lobby => "LOBBY",
            RoomState::Funding => "FUNDING",
            RoomState::Locked => "LOCKED",
            RoomState::Playing => "PLAYING",
            RoomState::Settled => "SETTLED",
            RoomState::Aborted => "ABORTED",
        };
        write!(f, "{}", name)
    }
}

/// One participant's seat.
///
/// `index` is a stable identity assigned once at join time. It is never reused or
/// reinterpreted as vector position after money has moved; the only reindex happens
/// on a LOBBY leave, before a deposit is possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub index: u32,
    pub wallet_address: Option<String>,
    /// Unique per-seat escrow address; deposits here unambiguously belong to this seat.
    pub deposit_address: String,
    pub deposit_tx_id: Option<String>,
    pub amount: u64,
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Player-supplied entropy mixed into every draw.
    pub client_seed: Option<String>,
    pub alive: bool,
    /// Cosmetic, resolved out-of-band after join.
    pub display_name: Option<String>,
}

impl Seat {
    pub fn new(index: u32, wallet_address: String, deposit_address: String) -> Self {
        Self {
            index,
            wallet_address: Some(wallet_address),
            deposit_address,
            deposit_tx_id: None,
            amount: 0,
            confirmed: false,
            confirmed_at: None,
            client_seed: None,
            alive: true,
            display_name: None,
        }
    }
}

/// Append-only record of one trigger pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub index: u32,
    pub shooter_seat_index: u32,
    pub died: bool,
    /// Hex randomness value used for this round, recomputable after the reveal.
    pub randomness: String,
    pub timestamp: DateTime<Utc>,
}

/// One survivor's share of a settled pot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub room_id: String,
    pub seat_index: u32,
    pub wallet_address: String,
    pub amount: u64,
}

/// One seat's share of an abort refund, linked back to its originating deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub room_id: String,
    pub seat_index: u32,
    pub wallet_address: String,
    pub amount: u64,
    pub deposit_tx_id: Option<String>,
}

/// Aggregate root for one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub mode: RoomMode,
    /// Seat price in sub-units.
    pub seat_price: u64,
    pub min_players: usize,
    pub max_players: usize,
    pub state: RoomState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub lock_height: Option<u64>,
    pub settlement_block_height: Option<u64>,
    /// Public hash of the secret seed, published at creation.
    pub server_commit: String,
    /// Never populated before settlement; the live seed stays in process memory.
    pub server_seed: Option<String>,
    pub house_cut_percent: u64,
    pub payout_tx_id: Option<String>,
    pub refund_tx_ids: Vec<String>,
    pub current_turn_seat_index: Option<u32>,
    pub seats: Vec<Seat>,
    pub rounds: Vec<Round>,
}

impl Room {
    pub fn seat_by_index(&self, index: u32) -> Option<&Seat> {
        self.seats.iter().find(|s| s.index == index)
    }

    pub fn seat_by_wallet(&self, wallet: &str) -> Option<&Seat> {
        self.seats
            .iter()
            .find(|s| s.wallet_address.as_deref() == Some(wallet))
    }

    pub fn confirmed_count(&self) -> usize {
        self.seats.iter().filter(|s| s.confirmed).count()
    }

    pub fn is_full(&self) -> bool {
        self.seats.len() >= self.max_players
    }

    /// Locking condition: every seat confirmed and enough of them to play.
    pub fn ready_to_lock(&self) -> bool {
        !self.seats.is_empty()
            && self.seats.iter().all(|s| s.confirmed)
            && self.confirmed_count() >= self.min_players
    }

    pub fn alive_seat_indices(&self) -> Vec<u32> {
        self.seats.iter().filter(|s| s.alive).map(|s| s.index).collect()
    }

    pub fn dead_seat_indices(&self) -> Vec<u32> {
        self.seats.iter().filter(|s| !s.alive).map(|s| s.index).collect()
    }

    /// Next stable seat identity. Always past every identity ever handed out, so
    /// an index is never reassigned while deposits can exist.
    pub fn next_seat_index(&self) -> u32 {
        self.seats.iter().map(|s| s.index + 1).max().unwrap_or(0)
    }

    /// Fixed turn order: deposit-confirmation time, seat index as tiebreak.
    /// Computed once at game start and never re-sorted as players die.
    pub fn turn_order(&self) -> Vec<u32> {
        let mut confirmed: Vec<&Seat> = self.seats.iter().filter(|s| s.confirmed).collect();
        confirmed.sort_by_key(|s| (s.confirmed_at, s.index));
        confirmed.into_iter().map(|s| s.index).collect()
    }

    /// Client seeds in seat-index order, the order fixed by the fairness protocol.
    pub fn client_seeds(&self) -> Vec<String> {
        let mut seats: Vec<&Seat> = self.seats.iter().collect();
        seats.sort_by_key(|s| s.index);
        seats
            .into_iter()
            .filter_map(|s| s.client_seed.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seat(index: u32, confirmed: bool, confirmed_secs: i64) -> Seat {
        let mut seat = Seat::new(index, format!("wallet-{}", index), format!("addr-{}", index));
        seat.confirmed = confirmed;
        if confirmed {
            seat.confirmed_at = Some(Utc.timestamp_opt(confirmed_secs, 0).unwrap());
        }
        seat
    }

    fn room_with_seats(seats: Vec<Seat>, min_players: usize) -> Room {
        let now = Utc::now();
        Room {
            id: "room-1".to_string(),
            mode: RoomMode::Regular,
            seat_price: 10,
            min_players,
            max_players: 6,
            state: RoomState::Funding,
            created_at: now,
            updated_at: now,
            expires_at: now,
            lock_height: None,
            settlement_block_height: None,
            server_commit: String::new(),
            server_seed: None,
            house_cut_percent: 5,
            payout_tx_id: None,
            refund_tx_ids: Vec::new(),
            current_turn_seat_index: None,
            seats,
            rounds: Vec::new(),
        }
    }

    #[test]
    fn partial_confirmation_never_locks() {
        // 3 seats, min 2, only 1 confirmed: not lockable.
        let room = room_with_seats(
            vec![seat(0, true, 10), seat(1, false, 0), seat(2, false, 0)],
            2,
        );
        assert!(!room.ready_to_lock());
    }

    #[test]
    fn all_confirmed_at_min_locks() {
        let room = room_with_seats(vec![seat(0, true, 10), seat(1, true, 20)], 2);
        assert!(room.ready_to_lock());
    }

    #[test]
    fn turn_order_sorts_by_confirmation_time_then_index() {
        let room = room_with_seats(
            vec![seat(0, true, 30), seat(1, true, 10), seat(2, true, 10)],
            2,
        );
        assert_eq!(room.turn_order(), vec![1, 2, 0]);
    }

    #[test]
    fn next_seat_index_skips_past_all_assigned_identities() {
        let mut room = room_with_seats(vec![seat(0, false, 0), seat(3, false, 0)], 2);
        assert_eq!(room.next_seat_index(), 4);
        room.seats.clear();
        assert_eq!(room.next_seat_index(), 0);
    }

    #[test]
    fn extreme_layout_scales_with_players() {
        assert_eq!(RoomMode::Regular.chamber_layout(4), (6, 1));
        assert_eq!(RoomMode::Extreme.chamber_layout(4), (12, 3));
        assert_eq!(RoomMode::Extreme.chamber_layout(2), (6, 1));
    }
}
