//! Persistence contract and in-memory implementation
//!
//! The engine only ever talks to `RoomStore`; persistence engine internals are out
//! of scope. `MemoryRoomStore` backs the binary and the tests.
//!
//! `update_room` replaces the whole aggregate and is only safe when the caller
//! knows no other chain is writing. Concurrent chains use the scoped mutations
//! (`transition_state`, `mark_*`, `set_current_turn`) so they never overwrite
//! each other's seat or state updates with a stale snapshot.

use crate::errors::StoreError;
use crate::room::types::{PayoutRecord, RefundRecord, Room, RoomState, Round, Seat};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// CRUD surface the room state machine requires of its persistence collaborator.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create_room(&self, room: Room) -> Result<(), StoreError>;
    async fn room(&self, room_id: &str) -> Result<Option<Room>, StoreError>;
    async fn update_room(&self, room: &Room) -> Result<(), StoreError>;
    /// Every room, regardless of state. Used by the sweeps.
    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Compare-and-swap state transition. Returns `false` without writing when
    /// the room is no longer in `from`; the caller lost the race.
    async fn transition_state(
        &self,
        room_id: &str,
        from: RoomState,
        to: RoomState,
    ) -> Result<bool, StoreError>;
    /// FUNDING → LOCKED with the fairness window recorded in the same write.
    async fn mark_locked(
        &self,
        room_id: &str,
        lock_height: u64,
        settlement_block_height: u64,
    ) -> Result<bool, StoreError>;
    /// PLAYING → SETTLED with the reveal and payout id recorded in the same write.
    async fn mark_settled(
        &self,
        room_id: &str,
        server_seed: &str,
        payout_tx_id: Option<&str>,
    ) -> Result<bool, StoreError>;
    /// Any non-terminal state → ABORTED. Returns `false` once terminal.
    async fn mark_aborted(&self, room_id: &str) -> Result<bool, StoreError>;
    /// Scoped write of the turn pointer. Never touches seats or state.
    async fn set_current_turn(
        &self,
        room_id: &str,
        seat_index: Option<u32>,
    ) -> Result<(), StoreError>;
    async fn add_refund_tx(&self, room_id: &str, tx_id: &str) -> Result<(), StoreError>;

    async fn add_seat(&self, room_id: &str, seat: Seat) -> Result<(), StoreError>;
    async fn update_seat(&self, room_id: &str, seat: &Seat) -> Result<(), StoreError>;
    /// Delete a seat and close the identity gap. Only legal while the room is in
    /// LOBBY, before any deposit can exist.
    async fn remove_seat_and_reindex(
        &self,
        room_id: &str,
        seat_index: u32,
    ) -> Result<(), StoreError>;

    async fn append_round(&self, room_id: &str, round: Round) -> Result<(), StoreError>;

    async fn add_payouts(&self, room_id: &str, payouts: &[PayoutRecord]) -> Result<(), StoreError>;
    async fn add_refunds(&self, room_id: &str, refunds: &[RefundRecord]) -> Result<(), StoreError>;
    async fn payouts(&self, room_id: &str) -> Result<Vec<PayoutRecord>, StoreError>;
    /// `None` means no refund was ever attempted; `Some(vec![])` means a refund
    /// attempt ran and produced nothing.
    async fn refunds(&self, room_id: &str) -> Result<Option<Vec<RefundRecord>>, StoreError>;
}

/// Concurrent-map-backed store.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<String, Room>,
    payouts: DashMap<String, Vec<PayoutRecord>>,
    refunds: DashMap<String, Vec<RefundRecord>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_room<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut Room) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound(format!("room {}", room_id)))?;
        let result = f(room.value_mut())?;
        room.updated_at = Utc::now();
        Ok(result)
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create_room(&self, room: Room) -> Result<(), StoreError> {
        if self.rooms.contains_key(&room.id) {
            return Err(StoreError::Conflict(format!("room {} exists", room.id)));
        }
        self.rooms.insert(room.id.clone(), room);
        Ok(())
    }

    async fn room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(room_id).map(|r| r.clone()))
    }

    async fn update_room(&self, room: &Room) -> Result<(), StoreError> {
        let mut stored = self
            .rooms
            .get_mut(&room.id)
            .ok_or_else(|| StoreError::NotFound(format!("room {}", room.id)))?;
        let mut updated = room.clone();
        updated.updated_at = Utc::now();
        *stored.value_mut() = updated;
        Ok(())
    }

    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.rooms.iter().map(|r| r.clone()).collect())
    }

    async fn transition_state(
        &self,
        room_id: &str,
        from: RoomState,
        to: RoomState,
    ) -> Result<bool, StoreError> {
        self.with_room(room_id, |room| {
            if room.state != from {
                return Ok(false);
            }
            room.state = to;
            Ok(true)
        })
    }

    async fn mark_locked(
        &self,
        room_id: &str,
        lock_height: u64,
        settlement_block_height: u64,
    ) -> Result<bool, StoreError> {
        self.with_room(room_id, |room| {
            if room.state != RoomState::Funding {
                return Ok(false);
            }
            room.state = RoomState::Locked;
            room.lock_height = Some(lock_height);
            room.settlement_block_height = Some(settlement_block_height);
            Ok(true)
        })
    }

    async fn mark_settled(
        &self,
        room_id: &str,
        server_seed: &str,
        payout_tx_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.with_room(room_id, |room| {
            if room.state != RoomState::Playing {
                return Ok(false);
            }
            room.state = RoomState::Settled;
            room.server_seed = Some(server_seed.to_string());
            room.payout_tx_id = payout_tx_id.map(|tx| tx.to_string());
            room.current_turn_seat_index = None;
            Ok(true)
        })
    }

    async fn mark_aborted(&self, room_id: &str) -> Result<bool, StoreError> {
        self.with_room(room_id, |room| {
            if matches!(room.state, RoomState::Settled | RoomState::Aborted) {
                return Ok(false);
            }
            room.state = RoomState::Aborted;
            room.current_turn_seat_index = None;
            Ok(true)
        })
    }

    async fn set_current_turn(
        &self,
        room_id: &str,
        seat_index: Option<u32>,
    ) -> Result<(), StoreError> {
        self.with_room(room_id, |room| {
            room.current_turn_seat_index = seat_index;
            Ok(())
        })
    }

    async fn add_refund_tx(&self, room_id: &str, tx_id: &str) -> Result<(), StoreError> {
        self.with_room(room_id, |room| {
            room.refund_tx_ids.push(tx_id.to_string());
            Ok(())
        })
    }

    async fn add_seat(&self, room_id: &str, seat: Seat) -> Result<(), StoreError> {
        self.with_room(room_id, |room| {
            if room.seats.iter().any(|s| s.index == seat.index) {
                return Err(StoreError::Conflict(format!(
                    "seat {} exists in room {}",
                    seat.index, room_id
                )));
            }
            room.seats.push(seat);
            Ok(())
        })
    }

    async fn update_seat(&self, room_id: &str, seat: &Seat) -> Result<(), StoreError> {
        self.with_room(room_id, |room| {
            let stored = room
                .seats
                .iter_mut()
                .find(|s| s.index == seat.index)
                .ok_or_else(|| {
                    StoreError::NotFound(format!("seat {} in room {}", seat.index, room_id))
                })?;
            *stored = seat.clone();
            Ok(())
        })
    }

    async fn remove_seat_and_reindex(
        &self,
        room_id: &str,
        seat_index: u32,
    ) -> Result<(), StoreError> {
        self.with_room(room_id, |room| {
            if room.state != RoomState::Lobby {
                return Err(StoreError::Conflict(format!(
                    "seat reindex rejected outside LOBBY (room {} is {})",
                    room_id, room.state
                )));
            }
            let before = room.seats.len();
            room.seats.retain(|s| s.index != seat_index);
            if room.seats.len() == before {
                return Err(StoreError::NotFound(format!(
                    "seat {} in room {}",
                    seat_index, room_id
                )));
            }
            for (position, seat) in room.seats.iter_mut().enumerate() {
                seat.index = position as u32;
            }
            Ok(())
        })
    }

    async fn append_round(&self, room_id: &str, round: Round) -> Result<(), StoreError> {
        self.with_room(room_id, |room| {
            room.rounds.push(round);
            Ok(())
        })
    }

    async fn add_payouts(&self, room_id: &str, payouts: &[PayoutRecord]) -> Result<(), StoreError> {
        self.payouts
            .entry(room_id.to_string())
            .or_default()
            .extend_from_slice(payouts);
        Ok(())
    }

    async fn add_refunds(&self, room_id: &str, refunds: &[RefundRecord]) -> Result<(), StoreError> {
        self.refunds
            .entry(room_id.to_string())
            .or_default()
            .extend_from_slice(refunds);
        Ok(())
    }

    async fn payouts(&self, room_id: &str) -> Result<Vec<PayoutRecord>, StoreError> {
        Ok(self.payouts.get(room_id).map(|p| p.clone()).unwrap_or_default())
    }

    async fn refunds(&self, room_id: &str) -> Result<Option<Vec<RefundRecord>>, StoreError> {
        Ok(self.refunds.get(room_id).map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::types::RoomMode;

    fn room(id: &str, state: RoomState) -> Room {
        let now = Utc::now();
        Room {
            id: id.to_string(),
            mode: RoomMode::Regular,
            seat_price: 10,
            min_players: 2,
            max_players: 6,
            state,
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
            seats: Vec::new(),
            rounds: Vec::new(),
        }
    }

    #[tokio::test]
    async fn seat_reindex_only_in_lobby() {
        let store = MemoryRoomStore::new();
        store.create_room(room("r1", RoomState::Lobby)).await.unwrap();
        for i in 0..3 {
            store
                .add_seat("r1", Seat::new(i, format!("w{}", i), format!("a{}", i)))
                .await
                .unwrap();
        }

        store.remove_seat_and_reindex("r1", 1).await.unwrap();
        let seats = store.room("r1").await.unwrap().unwrap().seats;
        assert_eq!(seats.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(seats[1].wallet_address.as_deref(), Some("w2"));

        let mut funding = store.room("r1").await.unwrap().unwrap();
        funding.state = RoomState::Funding;
        store.update_room(&funding).await.unwrap();
        assert!(store.remove_seat_and_reindex("r1", 0).await.is_err());
    }

    #[tokio::test]
    async fn refund_attempts_are_distinguishable_from_no_attempt() {
        let store = MemoryRoomStore::new();
        assert!(store.refunds("r1").await.unwrap().is_none());
        store.add_refunds("r1", &[]).await.unwrap();
        let attempt = store.refunds("r1").await.unwrap();
        assert!(matches!(attempt, Some(records) if records.is_empty()));
    }

    #[tokio::test]
    async fn scoped_turn_write_preserves_concurrent_seat_state() {
        let store = MemoryRoomStore::new();
        store.create_room(room("r1", RoomState::Playing)).await.unwrap();
        store
            .add_seat("r1", Seat::new(0, "w0".to_string(), "a0".to_string()))
            .await
            .unwrap();
        store
            .add_seat("r1", Seat::new(1, "w1".to_string(), "a1".to_string()))
            .await
            .unwrap();

        let mut dead = store.room("r1").await.unwrap().unwrap().seats[1].clone();
        dead.alive = false;
        store.update_seat("r1", &dead).await.unwrap();
        store.set_current_turn("r1", Some(0)).await.unwrap();

        let stored = store.room("r1").await.unwrap().unwrap();
        assert_eq!(stored.current_turn_seat_index, Some(0));
        assert!(!stored.seats[1].alive);
    }

    #[tokio::test]
    async fn state_transitions_have_a_single_winner() {
        let store = MemoryRoomStore::new();
        store.create_room(room("r1", RoomState::Funding)).await.unwrap();

        assert!(store.mark_locked("r1", 100, 102).await.unwrap());
        assert!(!store.mark_locked("r1", 100, 102).await.unwrap());
        let locked = store.room("r1").await.unwrap().unwrap();
        assert_eq!(locked.state, RoomState::Locked);
        assert_eq!(locked.lock_height, Some(100));
        assert_eq!(locked.settlement_block_height, Some(102));

        assert!(store
            .transition_state("r1", RoomState::Locked, RoomState::Playing)
            .await
            .unwrap());
        assert!(!store
            .transition_state("r1", RoomState::Locked, RoomState::Playing)
            .await
            .unwrap());

        assert!(store.mark_settled("r1", "seed", Some("tx-1")).await.unwrap());
        let settled = store.room("r1").await.unwrap().unwrap();
        assert_eq!(settled.state, RoomState::Settled);
        assert_eq!(settled.server_seed.as_deref(), Some("seed"));
        assert_eq!(settled.payout_tx_id.as_deref(), Some("tx-1"));

        assert!(!store.mark_aborted("r1").await.unwrap());
        assert!(!store.mark_settled("r1", "seed", None).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_room_creation_conflicts() {
        let store = MemoryRoomStore::new();
        store.create_room(room("r1", RoomState::Lobby)).await.unwrap();
        assert!(store.create_room(room("r1", RoomState::Lobby)).await.is_err());
    }
}
