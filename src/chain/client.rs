//! Ledger client contract
//!
//! The chain node is an opaque collaborator; this is the full set of calls the
//! engine issues against it. Implementations may fail or time out on any call.

use crate::errors::ChainError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One unspent output at a deposit address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Utxo {
    pub tx_id: String,
    pub vout: u32,
    pub amount: u64,
}

/// All unspent outputs at one address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoSet {
    pub entries: Vec<Utxo>,
    pub total_amount: u64,
}

/// One output of an outbound transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: u64,
}

/// A fully signed outbound transaction, ready for submission.
///
/// One signature per input, in input order, each produced by the key owning the
/// input's address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTx {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<TxOutput>,
    pub signatures: Vec<String>,
}

impl SignedTx {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.amount).sum()
    }

    pub fn output_total(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// Async RPC surface of the chain node.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current best block height.
    async fn current_height(&self) -> Result<u64, ChainError>;

    /// Hash of the block at `height`. Fails if the block is not yet mined.
    async fn block_hash_at(&self, height: u64) -> Result<String, ChainError>;

    /// Unspent outputs at `address`.
    async fn utxos_at(&self, address: &str) -> Result<UtxoSet, ChainError>;

    /// Submit a signed transaction, returning its id.
    async fn submit(&self, tx: &SignedTx) -> Result<String, ChainError>;

    /// Whether the client currently holds a live connection.
    async fn is_connected(&self) -> bool;
}
