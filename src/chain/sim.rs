//! Simple simulated ledger for testing and local runs - can be replaced with a
//! real node client later
//!
//! Tracks per-address unspent outputs in memory, advances height on demand, and
//! derives block hashes deterministically from the height.

use crate::chain::client::{LedgerClient, SignedTx, Utxo, UtxoSet};
use crate::errors::ChainError;
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

pub struct SimLedger {
    height: AtomicU64,
    utxos: DashMap<String, Vec<Utxo>>,
    connected: AtomicBool,
    /// When set, height queries fail with a connection error until cleared.
    fail_height: AtomicBool,
    /// Remaining submit calls that should fail with a connection error.
    fail_submits: AtomicU64,
}

impl SimLedger {
    pub fn new(start_height: u64) -> Self {
        Self {
            height: AtomicU64::new(start_height),
            utxos: DashMap::new(),
            connected: AtomicBool::new(true),
            fail_height: AtomicBool::new(false),
            fail_submits: AtomicU64::new(0),
        }
    }

    /// Mine `blocks` new blocks.
    pub fn advance(&self, blocks: u64) {
        self.height.fetch_add(blocks, Ordering::SeqCst);
    }

    /// Credit an address with a fresh unspent output, returning its tx id.
    pub fn credit(&self, address: &str, amount: u64) -> String {
        let tx_id = Uuid::new_v4().to_string();
        self.utxos.entry(address.to_string()).or_default().push(Utxo {
            tx_id: tx_id.clone(),
            vout: 0,
            amount,
        });
        tx_id
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_fail_height(&self, fail: bool) {
        self.fail_height.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_submits(&self, count: u64) {
        self.fail_submits.store(count, Ordering::SeqCst);
    }

    /// Total amount sitting at an address.
    pub fn balance(&self, address: &str) -> u64 {
        self.utxos
            .get(address)
            .map(|entry| entry.iter().map(|u| u.amount).sum())
            .unwrap_or(0)
    }

    fn check_connected(&self) -> Result<(), ChainError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChainError::NotConnected)
        }
    }
}

#[async_trait]
impl LedgerClient for SimLedger {
    async fn current_height(&self) -> Result<u64, ChainError> {
        self.check_connected()?;
        if self.fail_height.load(Ordering::SeqCst) {
            return Err(ChainError::Timeout);
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn block_hash_at(&self, height: u64) -> Result<String, ChainError> {
        self.check_connected()?;
        if height > self.height.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc(format!("block {} not yet mined", height)));
        }
        let mut hasher = Sha256::new();
        hasher.update(b"sim-block");
        hasher.update(height.to_le_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    async fn utxos_at(&self, address: &str) -> Result<UtxoSet, ChainError> {
        self.check_connected()?;
        let entries = self
            .utxos
            .get(address)
            .map(|e| e.clone())
            .unwrap_or_default();
        let total_amount = entries.iter().map(|u| u.amount).sum();
        Ok(UtxoSet {
            entries,
            total_amount,
        })
    }

    async fn submit(&self, tx: &SignedTx) -> Result<String, ChainError> {
        self.check_connected()?;
        if self.fail_submits.load(Ordering::SeqCst) > 0 {
            self.fail_submits.fetch_sub(1, Ordering::SeqCst);
            return Err(ChainError::Rpc("connection reset during submit".to_string()));
        }
        if tx.signatures.len() != tx.inputs.len() {
            return Err(ChainError::Rpc("signature count mismatch".to_string()));
        }
        if tx.output_total() > tx.input_total() {
            return Err(ChainError::Rpc("outputs exceed inputs".to_string()));
        }

        // Consume the spent inputs.
        for mut entry in self.utxos.iter_mut() {
            entry
                .value_mut()
                .retain(|u| !tx.inputs.iter().any(|i| i.tx_id == u.tx_id && i.vout == u.vout));
        }

        // Credit the outputs under the new transaction id.
        let tx_id = Uuid::new_v4().to_string();
        for (vout, output) in tx.outputs.iter().enumerate() {
            self.utxos
                .entry(output.address.clone())
                .or_default()
                .push(Utxo {
                    tx_id: tx_id.clone(),
                    vout: vout as u32,
                    amount: output.amount,
                });
        }
        Ok(tx_id)
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::TxOutput;

    #[tokio::test]
    async fn credit_and_spend_round_trip() {
        let ledger = SimLedger::new(100);
        ledger.credit("addr-a", 5_000);
        let utxos = ledger.utxos_at("addr-a").await.expect("utxos");
        assert_eq!(utxos.total_amount, 5_000);

        let tx = SignedTx {
            inputs: utxos.entries,
            outputs: vec![TxOutput {
                address: "addr-b".to_string(),
                amount: 4_000,
            }],
            signatures: vec!["sig".to_string()],
        };
        ledger.submit(&tx).await.expect("submit");
        assert_eq!(ledger.balance("addr-a"), 0);
        assert_eq!(ledger.balance("addr-b"), 4_000);
    }

    #[tokio::test]
    async fn disconnected_ledger_fails_all_calls() {
        let ledger = SimLedger::new(1);
        ledger.set_connected(false);
        assert!(matches!(
            ledger.current_height().await,
            Err(ChainError::NotConnected)
        ));
        assert!(!ledger.is_connected().await);
    }

    #[tokio::test]
    async fn block_hash_is_deterministic_and_future_blocks_unknown() {
        let ledger = SimLedger::new(10);
        let h1 = ledger.block_hash_at(5).await.expect("hash");
        let h2 = ledger.block_hash_at(5).await.expect("hash");
        assert_eq!(h1, h2);
        assert!(ledger.block_hash_at(11).await.is_err());
    }
}
