//! Transient per-room game state and the ephemeral secret-seed store
//!
//! Nothing in this module is ever persisted. Both maps live only in process memory
//! and are lost on crash; the startup recovery sweep force-aborts and refunds any
//! room found mid-flight, which is the documented compensation for that loss.

use dashmap::DashMap;
use tokio::sync::oneshot;

/// How a pending turn wait was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRelease {
    /// The shooter pulled the trigger.
    Pulled,
    /// The shooter left mid-game; their seat is already marked dead.
    Forfeit,
}

/// Transient state of one room in PLAYING.
///
/// The chamber arrangement is fixed in full before the first pull; the turn loop
/// only ever reads it.
pub struct PendingGame {
    pub room_id: String,
    pub block_hash: String,
    pub server_seed: String,
    pub client_seeds: Vec<String>,
    pub chambers: Vec<bool>,
    pub turn_order: Vec<u32>,
    pub current_round: u32,
    pub current_shooter: Option<u32>,
    turn_signal: Option<oneshot::Sender<TurnRelease>>,
}

impl PendingGame {
    pub fn new(
        room_id: String,
        block_hash: String,
        server_seed: String,
        client_seeds: Vec<String>,
        chambers: Vec<bool>,
        turn_order: Vec<u32>,
    ) -> Self {
        Self {
            room_id,
            block_hash,
            server_seed,
            client_seeds,
            chambers,
            turn_order,
            current_round: 0,
            current_shooter: None,
            turn_signal: None,
        }
    }
}

/// Thread-safe pool of in-flight games, at most one entry per room.
///
/// The continue signal is resolvable exactly once per armed turn; releasing when
/// nothing is armed is a safe no-op.
#[derive(Default)]
pub struct PendingGamePool {
    games: DashMap<String, PendingGame>,
}

impl PendingGamePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, game: PendingGame) {
        self.games.insert(game.room_id.clone(), game);
    }

    /// Drop a room's pending state. Any armed signal is dropped with it, which
    /// wakes a waiting turn with a closed-channel error.
    pub fn remove(&self, room_id: &str) -> bool {
        self.games.remove(room_id).is_some()
    }

    pub fn current_shooter(&self, room_id: &str) -> Option<u32> {
        self.games.get(room_id).and_then(|g| g.current_shooter)
    }

    pub fn current_round(&self, room_id: &str) -> Option<u32> {
        self.games.get(room_id).map(|g| g.current_round)
    }

    /// Arm the turn wait for `shooter`, returning the receiver to race against the
    /// turn timeout. Returns `None` if the room has no pending game.
    pub fn arm_turn(&self, room_id: &str, shooter: u32) -> Option<oneshot::Receiver<TurnRelease>> {
        let mut game = self.games.get_mut(room_id)?;
        let (tx, rx) = oneshot::channel();
        game.current_shooter = Some(shooter);
        game.turn_signal = Some(tx);
        Some(rx)
    }

    /// Release the armed turn wait. Safe no-op when nothing is armed or the room
    /// has no pending state.
    pub fn release_turn(&self, room_id: &str, release: TurnRelease) -> bool {
        let Some(mut game) = self.games.get_mut(room_id) else {
            return false;
        };
        match game.turn_signal.take() {
            Some(signal) => signal.send(release).is_ok(),
            None => false,
        }
    }

    /// Drop the armed signal without sending, used after a timeout so a late pull
    /// cannot release a turn that already resolved.
    pub fn disarm_turn(&self, room_id: &str) {
        if let Some(mut game) = self.games.get_mut(room_id) {
            game.turn_signal = None;
        }
    }

    pub fn advance_round(&self, room_id: &str) {
        if let Some(mut game) = self.games.get_mut(room_id) {
            game.current_round += 1;
        }
    }
}

/// Ephemeral store of room-scoped secret seeds, kept strictly apart from anything
/// persisted. A seed enters at room creation and leaves either by reveal at
/// settlement or by discard on abort.
#[derive(Default)]
pub struct SeedVault {
    seeds: DashMap<String, String>,
}

impl SeedVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, room_id: String, server_seed: String) {
        self.seeds.insert(room_id, server_seed);
    }

    pub fn get(&self, room_id: &str) -> Option<String> {
        self.seeds.get(room_id).map(|s| s.clone())
    }

    /// Remove and return the seed, purging it from memory.
    pub fn take(&self, room_id: &str) -> Option<String> {
        self.seeds.remove(room_id).map(|(_, seed)| seed)
    }

    pub fn discard(&self, room_id: &str) {
        self.seeds.remove(room_id);
    }
}
