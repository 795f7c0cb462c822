//! Room state machine
//!
//! Owns the Room/Seat/Round aggregate and enforces the lifecycle:
//! `LOBBY → FUNDING → LOCKED → PLAYING → {SETTLED | ABORTED}`. All collaborators
//! are injected at construction; there is no global state. Rooms are independent
//! of one another, and within a room correctness relies on idempotent event
//! handling rather than locks: a polling deposit monitor may re-deliver the same
//! confirmation, and two async chains may observe the same persisted state.

use crate::chain::client::LedgerClient;
use crate::chain::keys::KeyDerivation;
use crate::config::SixgunConfig;
use crate::errors::{GameError, GameResult};
use crate::events::{EventBus, RoomEvent};
use crate::fairness;
use crate::profile::ProfileService;
use crate::room::game_loop;
use crate::room::pending::{PendingGamePool, SeedVault, TurnRelease};
use crate::room::types::{Room, RoomMode, RoomState, Seat};
use crate::settlement::{max_seat_price, SettlementEngine};
use crate::store::RoomStore;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct RoomManager {
    pub(crate) config: SixgunConfig,
    pub(crate) store: Arc<dyn RoomStore>,
    pub(crate) ledger: Arc<dyn LedgerClient>,
    pub(crate) keys: Arc<dyn KeyDerivation>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) settlement: Arc<SettlementEngine>,
    pub(crate) profiles: Arc<dyn ProfileService>,
    pub(crate) seeds: SeedVault,
    pub(crate) pending: PendingGamePool,
}

impl RoomManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SixgunConfig,
        store: Arc<dyn RoomStore>,
        ledger: Arc<dyn LedgerClient>,
        keys: Arc<dyn KeyDerivation>,
        events: Arc<EventBus>,
        settlement: Arc<SettlementEngine>,
        profiles: Arc<dyn ProfileService>,
    ) -> Self {
        Self {
            config,
            store,
            ledger,
            keys,
            events,
            settlement,
            profiles,
            seeds: SeedVault::new(),
            pending: PendingGamePool::new(),
        }
    }

    pub(crate) async fn fetch_room(&self, room_id: &str) -> GameResult<Room> {
        self.store
            .room(room_id)
            .await?
            .ok_or_else(|| GameError::RoomNotFound(room_id.to_string()))
    }

    fn publish_snapshot(&self, room: Room) {
        self.events.publish(RoomEvent::RoomUpdate { room });
    }

    /// Create a room in LOBBY. REGULAR rooms must carry an explicit seat price;
    /// EXTREME rooms use the configured fixed price. The secret seed is generated
    /// here and only its commitment is persisted.
    pub async fn create_room(&self, mode: RoomMode, seat_price: Option<u64>) -> GameResult<Room> {
        let seat_price = match mode {
            RoomMode::Regular => seat_price.ok_or(GameError::PriceRequired)?,
            RoomMode::Extreme => self.config.game.extreme_seat_price,
        };
        // Bound so a full table's pot and house-cut products fit in u64.
        if seat_price > max_seat_price(self.config.game.max_players) {
            return Err(GameError::PriceTooLarge);
        }

        let server_seed = fairness::generate_server_seed();
        let server_commit = fairness::commit(&server_seed);
        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4().to_string(),
            mode,
            seat_price,
            min_players: self.config.game.min_players,
            max_players: self.config.game.max_players,
            state: RoomState::Lobby,
            created_at: now,
            updated_at: now,
            expires_at: now + ChronoDuration::seconds(self.config.game.room_expiry_secs as i64),
            lock_height: None,
            settlement_block_height: None,
            server_commit,
            server_seed: None,
            house_cut_percent: self.config.game.house_cut_percent,
            payout_tx_id: None,
            refund_tx_ids: Vec::new(),
            current_turn_seat_index: None,
            seats: Vec::new(),
            rounds: Vec::new(),
        };

        self.store.create_room(room.clone()).await?;
        self.seeds.insert(room.id.clone(), server_seed);
        info!(room_id = %room.id, %mode, seat_price, "room created");
        self.publish_snapshot(room.clone());
        Ok(room)
    }

    /// Seat a wallet in the room. Allocates the next stable seat identity and a
    /// unique per-seat deposit address; the first join moves LOBBY to FUNDING.
    pub async fn join_room(self: &Arc<Self>, room_id: &str, wallet: &str) -> GameResult<Seat> {
        let room = self.fetch_room(room_id).await?;
        if !matches!(room.state, RoomState::Lobby | RoomState::Funding) {
            return Err(GameError::WrongState {
                expected: "LOBBY or FUNDING",
                actual: room.state.to_string(),
            });
        }
        if room.is_full() {
            return Err(GameError::RoomFull(room.id.clone()));
        }
        if room.seat_by_wallet(wallet).is_some() {
            return Err(GameError::WalletAlreadySeated(wallet.to_string()));
        }

        let index = room.next_seat_index();
        let deposit_address = self.keys.seat_address(&room.id, index);
        let seat = Seat::new(index, wallet.to_string(), deposit_address);
        self.store.add_seat(&room.id, seat.clone()).await?;

        if room.state == RoomState::Lobby {
            // Scoped flip: a whole-room write here would erase the seat persisted above.
            self.store
                .transition_state(&room.id, RoomState::Lobby, RoomState::Funding)
                .await?;
        }
        info!(room_id = %room.id, seat = index, wallet, "seat joined");

        // Cosmetic profile lookup, resolved out of band. The room may be gone by
        // the time it lands; that is a silent skip, not an error.
        let manager = Arc::clone(self);
        let lookup_room = room.id.clone();
        let lookup_wallet = wallet.to_string();
        tokio::spawn(async move {
            manager
                .resolve_profile(&lookup_room, index, &lookup_wallet)
                .await;
        });

        if let Ok(Some(snapshot)) = self.store.room(&room.id).await {
            self.publish_snapshot(snapshot);
        }
        Ok(seat)
    }

    async fn resolve_profile(&self, room_id: &str, seat_index: u32, wallet: &str) {
        let Some(name) = self.profiles.display_name(wallet).await else {
            return;
        };
        // Re-fetch before mutating; the room or seat may have vanished mid-flight.
        let room = match self.store.room(room_id).await {
            Ok(Some(room)) => room,
            _ => {
                debug!(room_id, "room vanished before profile lookup resolved");
                return;
            }
        };
        let Some(seat) = room.seat_by_index(seat_index) else {
            debug!(room_id, seat_index, "seat vanished before profile lookup resolved");
            return;
        };
        let mut seat = seat.clone();
        seat.display_name = Some(name);
        if self.store.update_seat(room_id, &seat).await.is_ok() {
            if let Ok(Some(snapshot)) = self.store.room(room_id).await {
                self.publish_snapshot(snapshot);
            }
        }
    }

    /// Leave a room. In LOBBY the seat is removed and identities are reindexed
    /// (the only point where reuse is permitted, since no money has moved). In
    /// FUNDING a partial deposit makes clean removal unsafe, so the whole room
    /// aborts and refunds. In PLAYING the seat forfeits.
    pub async fn leave_room(&self, room_id: &str, wallet: &str) -> GameResult<()> {
        let room = self.fetch_room(room_id).await?;
        let seat = room
            .seat_by_wallet(wallet)
            .cloned()
            .ok_or_else(|| GameError::WalletNotSeated {
                room_id: room_id.to_string(),
                wallet: wallet.to_string(),
            })?;

        match room.state {
            RoomState::Lobby => {
                self.store.remove_seat_and_reindex(room_id, seat.index).await?;
                info!(room_id, seat = seat.index, "seat left lobby");
                if let Ok(Some(snapshot)) = self.store.room(room_id).await {
                    self.publish_snapshot(snapshot);
                }
                Ok(())
            }
            RoomState::Funding => {
                info!(room_id, seat = seat.index, "leave during funding aborts the room");
                self.abort_room(room_id, "player left during funding").await
            }
            RoomState::Playing => {
                let mut seat = seat;
                seat.alive = false;
                self.store.update_seat(room_id, &seat).await?;
                info!(room_id, seat = seat.index, "seat forfeited");
                self.events.publish(RoomEvent::PlayerForfeit {
                    room_id: room_id.to_string(),
                    seat_index: seat.index,
                    wallet_address: seat.wallet_address.clone(),
                });
                // If it was this seat's turn, release the wait so the loop proceeds.
                if self.pending.current_shooter(room_id) == Some(seat.index) {
                    self.pending.release_turn(room_id, TurnRelease::Forfeit);
                }
                Ok(())
            }
            state => Err(GameError::LeaveRejected(state.to_string())),
        }
    }

    /// Record a deposit confirmation. Idempotent: a seat already confirmed is a
    /// silent no-op, guarding against the polling monitor re-delivering the same
    /// confirmation. Re-evaluates the locking condition on success.
    pub async fn confirm_deposit(
        self: &Arc<Self>,
        room_id: &str,
        seat_index: u32,
        tx_id: &str,
        amount: u64,
    ) -> GameResult<()> {
        let room = self.fetch_room(room_id).await?;
        let seat = room
            .seat_by_index(seat_index)
            .ok_or(GameError::SeatNotFound {
                room_id: room_id.to_string(),
                seat_index,
            })?;
        if seat.confirmed {
            debug!(room_id, seat_index, "duplicate deposit confirmation ignored");
            return Ok(());
        }
        if room.state != RoomState::Funding {
            return Err(GameError::WrongState {
                expected: "FUNDING",
                actual: room.state.to_string(),
            });
        }

        let mut seat = seat.clone();
        seat.deposit_tx_id = Some(tx_id.to_string());
        seat.amount = amount;
        seat.confirmed = true;
        seat.confirmed_at = Some(Utc::now());
        self.store.update_seat(room_id, &seat).await?;
        info!(room_id, seat_index, amount, tx_id, "deposit confirmed");

        if let Ok(Some(snapshot)) = self.store.room(room_id).await {
            self.publish_snapshot(snapshot);
        }
        self.check_and_lock_room(room_id).await
    }

    /// Accept player entropy before the chamber arrangement is fixed.
    pub async fn submit_client_seed(
        &self,
        room_id: &str,
        wallet: &str,
        client_seed: &str,
    ) -> GameResult<()> {
        let room = self.fetch_room(room_id).await?;
        if !matches!(
            room.state,
            RoomState::Lobby | RoomState::Funding | RoomState::Locked
        ) {
            return Err(GameError::WrongState {
                expected: "LOBBY, FUNDING or LOCKED",
                actual: room.state.to_string(),
            });
        }
        let seat = room
            .seat_by_wallet(wallet)
            .ok_or_else(|| GameError::WalletNotSeated {
                room_id: room_id.to_string(),
                wallet: wallet.to_string(),
            })?;
        let mut seat = seat.clone();
        seat.client_seed = Some(client_seed.to_string());
        self.store.update_seat(room_id, &seat).await?;
        debug!(room_id, seat = seat.index, "client seed recorded");
        Ok(())
    }

    /// Lock the room once every seat is confirmed and enough players are in.
    pub(crate) async fn check_and_lock_room(self: &Arc<Self>, room_id: &str) -> GameResult<()> {
        let room = self.fetch_room(room_id).await?;
        if room.state != RoomState::Funding || !room.ready_to_lock() {
            return Ok(());
        }
        self.lock_room(room).await
    }

    /// Record the fairness window. The settlement height sits far enough ahead of
    /// the lock height that its block hash is unknowable now. A failed height
    /// fetch fails closed: abort and refund rather than leaving the room stuck.
    async fn lock_room(self: &Arc<Self>, room: Room) -> GameResult<()> {
        let height = match self.ledger.current_height().await {
            Ok(height) => height,
            Err(err) => {
                warn!(room_id = %room.id, error = %err, "height fetch failed at lock, failing closed");
                return self.abort_room(&room.id, "chain unavailable at lock").await;
            }
        };

        let settlement_height = height + self.config.chain.settlement_offset;
        // CAS out of FUNDING: only the winning chain records the window and
        // spawns the loop. Losing the race means another lock already ran.
        if !self
            .store
            .mark_locked(&room.id, height, settlement_height)
            .await?
        {
            debug!(room_id = %room.id, "room already left FUNDING, skipping lock");
            return Ok(());
        }
        info!(
            room_id = %room.id,
            lock_height = height,
            settlement_height,
            "room locked"
        );
        if let Ok(Some(snapshot)) = self.store.room(&room.id).await {
            self.publish_snapshot(snapshot);
        }

        let manager = Arc::clone(self);
        let room_id = room.id.clone();
        tokio::spawn(async move {
            game_loop::run_locked_room(manager, room_id).await;
        });
        Ok(())
    }

    /// Release the current turn's wait. The caller must own the shooter's seat,
    /// validated by stable seat identity. Anything else is rejected without side
    /// effects.
    pub async fn pull_trigger(&self, room_id: &str, wallet: &str) -> GameResult<()> {
        let room = self.fetch_room(room_id).await?;
        if room.state != RoomState::Playing {
            return Err(GameError::WrongState {
                expected: "PLAYING",
                actual: room.state.to_string(),
            });
        }
        let seat = room
            .seat_by_wallet(wallet)
            .ok_or_else(|| GameError::WalletNotSeated {
                room_id: room_id.to_string(),
                wallet: wallet.to_string(),
            })?;
        match self.pending.current_shooter(room_id) {
            Some(shooter) if shooter == seat.index && seat.alive => {
                self.pending.release_turn(room_id, TurnRelease::Pulled);
                Ok(())
            }
            _ => Err(GameError::NotYourTurn),
        }
    }

    /// Abort from any non-terminal state: discard transient state, persist the
    /// terminal state, then attempt refunds for confirmed seats. The refund
    /// attempt's result is always persisted, even a failure persists an empty
    /// list, so "no refund needed" and "refund attempted and failed" stay
    /// distinguishable.
    pub async fn abort_room(&self, room_id: &str, reason: &str) -> GameResult<()> {
        let Some(room) = self.store.room(room_id).await? else {
            return Ok(());
        };
        if room.state.is_terminal() {
            return Ok(());
        }
        // CAS to the terminal state first: a concurrent settle or second abort
        // that got there already owns the room.
        if !self.store.mark_aborted(room_id).await? {
            return Ok(());
        }
        warn!(room_id, reason, state = %room.state, "aborting room");

        self.seeds.discard(room_id);
        self.pending.remove(room_id);

        self.events.publish(RoomEvent::RoomAborted {
            room_id: room_id.to_string(),
            reason: reason.to_string(),
        });

        match self.settlement.refund(&room).await {
            Ok(outcome) => {
                // A legitimate outcome may be zero transactions.
                self.store.add_refunds(room_id, &outcome.records).await?;
                if let Some(tx_id) = outcome.tx_id {
                    self.store.add_refund_tx(room_id, &tx_id).await?;
                }
            }
            Err(err) => {
                error!(room_id, error = %err, "refund attempt failed");
                self.store.add_refunds(room_id, &[]).await?;
            }
        }

        if let Ok(Some(snapshot)) = self.store.room(room_id).await {
            self.publish_snapshot(snapshot);
        }
        self.events.close_room(room_id);
        Ok(())
    }

    /// Periodic sweep: abort LOBBY/FUNDING rooms past expiry, force-abort rooms
    /// stuck in LOCKED (settlement height never reached) or in PLAYING with no
    /// round progress.
    pub async fn check_expired_rooms(&self) -> GameResult<()> {
        let rooms = self.store.all_rooms().await?;
        let now = Utc::now();
        for room in rooms {
            let reason = match room.state {
                RoomState::Lobby | RoomState::Funding if now > room.expires_at => Some("room expired"),
                RoomState::Locked
                    if (now - room.updated_at).num_seconds()
                        > self.config.game.locked_stuck_secs as i64 =>
                {
                    Some("settlement height never reached")
                }
                RoomState::Playing
                    if (now - room.updated_at).num_seconds()
                        > self.config.game.playing_stuck_secs as i64 =>
                {
                    Some("turn loop stalled")
                }
                _ => None,
            };
            if let Some(reason) = reason {
                if let Err(err) = self.abort_room(&room.id, reason).await {
                    error!(room_id = %room.id, error = %err, "expiry abort failed");
                }
            }
        }
        Ok(())
    }

    /// Startup-only sweep: any non-terminal room is a crash survivor. Rooms with
    /// confirmed deposits abort through the refund path; the rest are marked
    /// aborted directly.
    pub async fn recover_stale_rooms(&self) -> GameResult<()> {
        let rooms = self.store.all_rooms().await?;
        for room in rooms {
            if room.state.is_terminal() {
                continue;
            }
            warn!(room_id = %room.id, state = %room.state, "recovering stale room");
            if room.confirmed_count() > 0 {
                if let Err(err) = self.abort_room(&room.id, "crash recovery").await {
                    error!(room_id = %room.id, error = %err, "crash recovery abort failed");
                }
            } else if self.store.mark_aborted(&room.id).await? {
                self.events.publish(RoomEvent::RoomAborted {
                    room_id: room.id.clone(),
                    reason: "crash recovery".to_string(),
                });
                self.events.close_room(&room.id);
            }
        }
        Ok(())
    }
}
