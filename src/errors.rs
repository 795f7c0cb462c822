//! Error types for the sixgun engine
//!
//! Three families, matching how failures are handled: validation errors surface to
//! the caller verbatim, chain errors drive the fail-closed/retry policies, store
//! errors come from the persistence collaborator.

use thiserror::Error;

/// Validation and lifecycle errors. Never retried.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("seat {seat_index} not found in room {room_id}")]
    SeatNotFound { room_id: String, seat_index: u32 },

    #[error("wallet {wallet} holds no seat in room {room_id}")]
    WalletNotSeated { room_id: String, wallet: String },

    #[error("room {0} is full")]
    RoomFull(String),

    #[error("wallet {0} already holds a seat in this room")]
    WalletAlreadySeated(String),

    #[error("room is {actual}, operation requires {expected}")]
    WrongState { expected: &'static str, actual: String },

    #[error("it is not this wallet's turn")]
    NotYourTurn,

    #[error("regular rooms require an explicit seat price")]
    PriceRequired,

    #[error("seat price too large to settle")]
    PriceTooLarge,

    #[error("cannot leave a room in state {0}")]
    LeaveRejected(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the ledger collaborator.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("ledger client not connected")]
    NotConnected,

    #[error("ledger request timed out")]
    Timeout,

    #[error("ledger rpc error: {0}")]
    Rpc(String),

    #[error("no spendable funds at the room's deposit addresses")]
    NoFunds,

    #[error("nothing to pay out")]
    NothingToPay,
}

impl ChainError {
    /// Connection-class failures are the only ones settlement submission retries.
    /// Business failures (no funds, nothing to pay) propagate immediately.
    pub fn is_connection(&self) -> bool {
        match self {
            ChainError::NotConnected | ChainError::Timeout => true,
            ChainError::Rpc(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("reset")
                    || msg.contains("disconnected")
                    || msg.contains("not connected")
                    || msg.contains("connection")
            }
            ChainError::NoFunds | ChainError::NothingToPay => false,
        }
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_retryable() {
        assert!(ChainError::NotConnected.is_connection());
        assert!(ChainError::Timeout.is_connection());
        assert!(ChainError::Rpc("connection reset by peer".into()).is_connection());
        assert!(ChainError::Rpc("node disconnected".into()).is_connection());
    }

    #[test]
    fn business_errors_are_not_retryable() {
        assert!(!ChainError::NoFunds.is_connection());
        assert!(!ChainError::NothingToPay.is_connection());
        assert!(!ChainError::Rpc("invalid output script".into()).is_connection());
    }
}
