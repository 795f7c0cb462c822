//! Ledger collaborator seam: the RPC contract the engine issues against the chain,
//! deterministic key/address derivation, and an in-process simulated ledger.

pub mod client;
pub mod keys;
pub mod sim;

pub use client::{LedgerClient, SignedTx, TxOutput, Utxo, UtxoSet};
pub use keys::{HdKeyDerivation, KeyDerivation, SeatKeypair};
pub use sim::SimLedger;
