//! Sixgun - provably-fair multiplayer elimination wagering engine
//!
//! Players stake into per-seat escrow addresses, the server commits to a secret
//! seed before play, rounds resolve from a deterministic mix of server secret,
//! player entropy, and a future block hash, and survivors split the pot minus a
//! house cut. One authoritative process per deployment; rooms are independent
//! and driven by asynchronous chain confirmations and turn signals.

pub mod chain;
pub mod config;
pub mod errors;
pub mod events;
pub mod fairness;
pub mod profile;
pub mod room;
pub mod settlement;
pub mod store;

pub use config::SixgunConfig;
pub use errors::{ChainError, GameError, GameResult, StoreError};
pub use room::{Room, RoomManager, RoomMode, RoomState};
