//! Room aggregate, its state machine, and the transient per-game state.

pub mod game_loop;
pub mod manager;
pub mod pending;
pub mod types;

pub use manager::RoomManager;
pub use pending::{PendingGame, PendingGamePool, SeedVault, TurnRelease};
pub use types::{PayoutRecord, RefundRecord, Room, RoomMode, RoomState, Round, Seat};
