//! Settlement and payout: turning a game outcome into money movement
//!
//! All arithmetic is integer sub-units with floor division; dust left by the floor
//! stays unallocated. Transaction submission retries only connection-class ledger
//! failures; business failures propagate immediately.

use crate::chain::client::{LedgerClient, SignedTx, TxOutput, Utxo};
use crate::chain::keys::KeyDerivation;
use crate::config::{ChainConfig, SettlementConfig};
use crate::errors::ChainError;
use crate::room::types::{PayoutRecord, RefundRecord, Room, Seat};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// Sentinel recorded as the payout tx id when submission ultimately failed.
/// The room still settles; state integrity takes priority over payment.
pub const PAYOUT_FAILED_MARKER: &str = "PAYOUT_FAILED";

/// Integer split of a settled pot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PotBreakdown {
    pub pot: u64,
    pub house_cut: u64,
    pub payout_pool: u64,
    pub per_survivor: u64,
}

/// Largest seat price whose full-table pot and house-cut products stay within
/// u64. Enforced at room creation and config validation.
pub fn max_seat_price(max_players: usize) -> u64 {
    u64::MAX / 100 / max_players.max(1) as u64
}

fn clamp_subunits(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Split the pot in sub-units. Floor division at each step; with zero survivors
/// the house retains everything. Intermediates are widened to u128; room
/// creation bounds prices with `max_seat_price` so the narrowing back to u64 is
/// lossless in practice.
pub fn split_pot(
    seat_price: u64,
    seat_count: u64,
    house_cut_percent: u64,
    survivor_count: u64,
) -> PotBreakdown {
    let pot = seat_price as u128 * seat_count as u128;
    let house_cut = pot * house_cut_percent as u128 / 100;
    let payout_pool = pot - house_cut;
    let per_survivor = if survivor_count == 0 {
        0
    } else {
        payout_pool / survivor_count as u128
    };
    PotBreakdown {
        pot: clamp_subunits(pot),
        house_cut: clamp_subunits(house_cut),
        payout_pool: clamp_subunits(payout_pool),
        per_survivor: clamp_subunits(per_survivor),
    }
}

/// Result of a refund attempt.
#[derive(Debug, Default)]
pub struct RefundOutcome {
    pub records: Vec<RefundRecord>,
    pub tx_id: Option<String>,
}

/// Builds, signs, and submits payout and refund transactions.
pub struct SettlementEngine {
    ledger: Arc<dyn LedgerClient>,
    keys: Arc<dyn KeyDerivation>,
    chain: ChainConfig,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        keys: Arc<dyn KeyDerivation>,
        chain: ChainConfig,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            keys,
            chain,
            config,
        }
    }

    /// Compute the payout records for a finished game. Pure; persisted by the
    /// caller before any submission attempt.
    pub fn build_payouts(&self, room: &Room, survivors: &[&Seat]) -> (PotBreakdown, Vec<PayoutRecord>) {
        let breakdown = split_pot(
            room.seat_price,
            room.seats.len() as u64,
            room.house_cut_percent,
            survivors.len() as u64,
        );
        let records = survivors
            .iter()
            .filter_map(|seat| {
                seat.wallet_address.as_ref().map(|wallet| PayoutRecord {
                    room_id: room.id.clone(),
                    seat_index: seat.index,
                    wallet_address: wallet.clone(),
                    amount: breakdown.per_survivor,
                })
            })
            .collect();
        (breakdown, records)
    }

    /// Build, sign, and submit the payout transaction: every seat's escrow funds
    /// in, one output per survivor, change to the treasury.
    pub async fn submit_payout(
        &self,
        room: &Room,
        payouts: &[PayoutRecord],
    ) -> Result<String, ChainError> {
        if payouts.is_empty() {
            return Err(ChainError::NothingToPay);
        }
        let (inputs, signatures, input_total) = self.gather_inputs(room).await?;
        if inputs.is_empty() {
            return Err(ChainError::NoFunds);
        }

        let mut outputs: Vec<TxOutput> = payouts
            .iter()
            .map(|p| TxOutput {
                address: p.wallet_address.clone(),
                amount: p.amount,
            })
            .collect();
        let paid: u64 = outputs.iter().map(|o| o.amount).sum();
        let change = input_total.saturating_sub(paid);
        if change > 0 {
            outputs.push(TxOutput {
                address: self.change_address(room),
                amount: change,
            });
        }

        let tx = SignedTx {
            inputs,
            outputs,
            signatures,
        };
        let tx_id = self.submit_with_retry(&tx).await?;
        info!(room_id = %room.id, tx_id = %tx_id, paid, change, "payout submitted");
        Ok(tx_id)
    }

    /// Refund confirmed, wallet-linked seats on abort. Gathers whatever actually
    /// sits at the escrow addresses, holds back the fee buffer, and splits the
    /// rest evenly. A zero per-seat share sends nothing rather than dust.
    pub async fn refund(&self, room: &Room) -> Result<RefundOutcome, ChainError> {
        let eligible: Vec<&Seat> = room
            .seats
            .iter()
            .filter(|s| s.confirmed && s.wallet_address.is_some())
            .collect();
        if eligible.is_empty() {
            return Ok(RefundOutcome::default());
        }

        let (inputs, signatures, input_total) = self.gather_inputs(room).await?;
        let available = input_total.saturating_sub(self.config.refund_fee_buffer);
        let share = available / eligible.len() as u64;
        if share == 0 {
            info!(room_id = %room.id, input_total, "nothing refundable after fee buffer");
            return Ok(RefundOutcome::default());
        }

        let outputs: Vec<TxOutput> = eligible
            .iter()
            .map(|seat| TxOutput {
                address: seat.wallet_address.clone().unwrap_or_default(),
                amount: share,
            })
            .collect();
        let tx = SignedTx {
            inputs,
            outputs,
            signatures,
        };
        let tx_id = self.submit_with_retry(&tx).await?;

        let records = eligible
            .iter()
            .map(|seat| RefundRecord {
                room_id: room.id.clone(),
                seat_index: seat.index,
                wallet_address: seat.wallet_address.clone().unwrap_or_default(),
                amount: share,
                deposit_tx_id: seat.deposit_tx_id.clone(),
            })
            .collect();
        info!(room_id = %room.id, tx_id = %tx_id, share, seats = eligible.len(), "refund submitted");
        Ok(RefundOutcome {
            records,
            tx_id: Some(tx_id),
        })
    }

    /// Gather unspent outputs from every seat's deposit address and sign each
    /// input with that seat's derived key.
    async fn gather_inputs(
        &self,
        room: &Room,
    ) -> Result<(Vec<Utxo>, Vec<String>, u64), ChainError> {
        let mut inputs = Vec::new();
        let mut signatures = Vec::new();
        let mut total = 0u64;
        for seat in &room.seats {
            let utxos = self.ledger.utxos_at(&seat.deposit_address).await?;
            let keypair = self.keys.seat_keypair(&room.id, seat.index);
            for utxo in utxos.entries {
                signatures.push(sign_input(&keypair.secret_key, &utxo));
                total += utxo.amount;
                inputs.push(utxo);
            }
        }
        Ok((inputs, signatures, total))
    }

    /// Treasury address, unless it does not belong to the active network, in which
    /// case change falls back to the first seat's escrow address.
    fn change_address(&self, room: &Room) -> String {
        let treasury = &self.chain.treasury_address;
        if !treasury.is_empty() && treasury.starts_with(&self.chain.network_prefix) {
            return treasury.clone();
        }
        warn!(room_id = %room.id, "treasury address unusable on this network, falling back to seat escrow");
        room.seats
            .first()
            .map(|s| s.deposit_address.clone())
            .unwrap_or_else(|| treasury.clone())
    }

    /// Submit with bounded retry. Only connection-class failures retry; anything
    /// else propagates on the first attempt.
    async fn submit_with_retry(&self, tx: &SignedTx) -> Result<String, ChainError> {
        let mut attempt = 1;
        loop {
            match self.ledger.submit(tx).await {
                Ok(tx_id) => return Ok(tx_id),
                Err(err) if err.is_connection() && attempt < self.config.submit_attempts => {
                    warn!(attempt, error = %err, "submit failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.submit_retry_delay()).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn sign_input(secret_key_hex: &str, utxo: &Utxo) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret_key_hex.as_bytes());
    hasher.update(utxo.tx_id.as_bytes());
    hasher.update(utxo.vout.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::keys::HdKeyDerivation;
    use crate::chain::sim::SimLedger;
    use crate::room::types::{RoomMode, RoomState};
    use chrono::Utc;

    fn settlement_config() -> SettlementConfig {
        SettlementConfig {
            submit_attempts: 3,
            submit_retry_delay_ms: 1,
            refund_fee_buffer: 100,
        }
    }

    fn chain_config() -> ChainConfig {
        ChainConfig {
            treasury_address: "six1treasury".to_string(),
            network_prefix: "six1".to_string(),
            ..ChainConfig::default()
        }
    }

    fn test_room(keys: &HdKeyDerivation, seat_count: u32, seat_price: u64) -> Room {
        let now = Utc::now();
        let seats = (0..seat_count)
            .map(|i| {
                let mut seat = Seat::new(
                    i,
                    format!("six1wallet{}", i),
                    keys.seat_address("room-1", i),
                );
                seat.confirmed = true;
                seat.confirmed_at = Some(now);
                seat.deposit_tx_id = Some(format!("deposit-{}", i));
                seat.amount = seat_price;
                seat
            })
            .collect();
        Room {
            id: "room-1".to_string(),
            mode: RoomMode::Regular,
            seat_price,
            min_players: 2,
            max_players: 6,
            state: RoomState::Playing,
            created_at: now,
            updated_at: now,
            expires_at: now,
            lock_height: Some(1),
            settlement_block_height: Some(4),
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
    fn split_pot_worked_example() {
        // 6 seats at 10 sub-units, 5% house cut, 5 survivors:
        // pot 60, cut 3, pool 57, per-survivor 11, remainder 2 unallocated.
        let breakdown = split_pot(10, 6, 5, 5);
        assert_eq!(breakdown.pot, 60);
        assert_eq!(breakdown.house_cut, 3);
        assert_eq!(breakdown.payout_pool, 57);
        assert_eq!(breakdown.per_survivor, 11);
        assert!(breakdown.house_cut + breakdown.per_survivor * 5 <= breakdown.pot);
    }

    #[test]
    fn split_pot_zero_survivors_leaves_everything_to_the_house() {
        let breakdown = split_pot(10, 4, 5, 0);
        assert_eq!(breakdown.per_survivor, 0);
        assert_eq!(breakdown.payout_pool, 38);
    }

    #[test]
    fn split_pot_clamps_instead_of_overflowing() {
        let breakdown = split_pot(u64::MAX, 6, 5, 5);
        assert_eq!(breakdown.pot, u64::MAX);
        assert!(breakdown.house_cut <= breakdown.pot);
        assert!(breakdown.per_survivor <= breakdown.pot);
    }

    #[test]
    fn max_seat_price_keeps_full_table_arithmetic_in_range() {
        let price = max_seat_price(6);
        let pot = price.checked_mul(6).expect("pot fits");
        assert!(pot.checked_mul(99).is_some());
    }

    #[test]
    fn pot_invariant_holds_across_splits() {
        for survivors in 1..=6u64 {
            let b = split_pot(1_234_567, 6, 7, survivors);
            let distributed = b.house_cut + b.per_survivor * survivors;
            assert!(distributed <= b.pot);
            assert!(b.pot - distributed < survivors.max(1));
        }
    }

    #[tokio::test]
    async fn payout_moves_escrow_to_survivors_and_treasury() {
        let ledger = Arc::new(SimLedger::new(10));
        let keys = Arc::new(HdKeyDerivation::new(b"root".to_vec(), "six1"));
        let room = test_room(&keys, 2, 1_000);
        for seat in &room.seats {
            ledger.credit(&seat.deposit_address, 1_000);
        }

        let engine = SettlementEngine::new(
            ledger.clone(),
            keys.clone(),
            chain_config(),
            settlement_config(),
        );
        let survivors: Vec<&Seat> = vec![&room.seats[1]];
        let (breakdown, payouts) = engine.build_payouts(&room, &survivors);
        assert_eq!(breakdown.pot, 2_000);
        assert_eq!(breakdown.per_survivor, 1_900);

        engine.submit_payout(&room, &payouts).await.expect("payout");
        assert_eq!(ledger.balance("six1wallet1"), 1_900);
        assert_eq!(ledger.balance("six1treasury"), 100);
    }

    #[tokio::test]
    async fn refund_splits_evenly_after_fee_buffer() {
        let ledger = Arc::new(SimLedger::new(10));
        let keys = Arc::new(HdKeyDerivation::new(b"root".to_vec(), "six1"));
        let room = test_room(&keys, 2, 1_000);
        for seat in &room.seats {
            ledger.credit(&seat.deposit_address, 1_000);
        }

        let engine = SettlementEngine::new(
            ledger.clone(),
            keys.clone(),
            chain_config(),
            settlement_config(),
        );
        let outcome = engine.refund(&room).await.expect("refund");
        assert_eq!(outcome.records.len(), 2);
        // (2000 - 100 buffer) / 2
        assert!(outcome.records.iter().all(|r| r.amount == 950));
        assert!(outcome.records.iter().all(|r| r.deposit_tx_id.is_some()));
        assert!(outcome.tx_id.is_some());
        assert_eq!(ledger.balance("six1wallet0"), 950);
    }

    #[tokio::test]
    async fn refund_with_no_confirmed_seats_is_empty_not_an_error() {
        let ledger = Arc::new(SimLedger::new(10));
        let keys = Arc::new(HdKeyDerivation::new(b"root".to_vec(), "six1"));
        let mut room = test_room(&keys, 2, 1_000);
        for seat in &mut room.seats {
            seat.confirmed = false;
        }

        let engine = SettlementEngine::new(ledger, keys, chain_config(), settlement_config());
        let outcome = engine.refund(&room).await.expect("refund");
        assert!(outcome.records.is_empty());
        assert!(outcome.tx_id.is_none());
    }

    #[tokio::test]
    async fn dust_shares_are_suppressed() {
        let ledger = Arc::new(SimLedger::new(10));
        let keys = Arc::new(HdKeyDerivation::new(b"root".to_vec(), "six1"));
        let room = test_room(&keys, 2, 1_000);
        // Balance below the fee buffer: per-seat share floors to zero.
        ledger.credit(&room.seats[0].deposit_address, 90);

        let engine = SettlementEngine::new(ledger, keys, chain_config(), settlement_config());
        let outcome = engine.refund(&room).await.expect("refund");
        assert!(outcome.records.is_empty());
        assert!(outcome.tx_id.is_none());
    }

    #[tokio::test]
    async fn connection_failures_retry_then_succeed() {
        let ledger = Arc::new(SimLedger::new(10));
        let keys = Arc::new(HdKeyDerivation::new(b"root".to_vec(), "six1"));
        let room = test_room(&keys, 2, 1_000);
        for seat in &room.seats {
            ledger.credit(&seat.deposit_address, 1_000);
        }
        ledger.fail_next_submits(2);

        let engine = SettlementEngine::new(
            ledger.clone(),
            keys.clone(),
            chain_config(),
            settlement_config(),
        );
        let survivors: Vec<&Seat> = vec![&room.seats[0]];
        let (_, payouts) = engine.build_payouts(&room, &survivors);
        assert!(engine.submit_payout(&room, &payouts).await.is_ok());
    }

    #[tokio::test]
    async fn business_failures_do_not_retry() {
        let ledger = Arc::new(SimLedger::new(10));
        let keys = Arc::new(HdKeyDerivation::new(b"root".to_vec(), "six1"));
        let room = test_room(&keys, 2, 1_000);
        // No escrow funds at all.
        let engine = SettlementEngine::new(ledger, keys, chain_config(), settlement_config());
        let survivors: Vec<&Seat> = vec![&room.seats[0]];
        let (_, payouts) = engine.build_payouts(&room, &survivors);
        assert!(matches!(
            engine.submit_payout(&room, &payouts).await,
            Err(ChainError::NoFunds)
        ));
    }

    #[tokio::test]
    async fn incompatible_treasury_falls_back_to_seat_escrow() {
        let ledger = Arc::new(SimLedger::new(10));
        let keys = Arc::new(HdKeyDerivation::new(b"root".to_vec(), "six1"));
        let room = test_room(&keys, 2, 1_000);
        for seat in &room.seats {
            ledger.credit(&seat.deposit_address, 1_000);
        }

        let mut chain = chain_config();
        chain.treasury_address = "other1treasury".to_string();
        let engine = SettlementEngine::new(ledger.clone(), keys, chain, settlement_config());
        let survivors: Vec<&Seat> = vec![&room.seats[1]];
        let (_, payouts) = engine.build_payouts(&room, &survivors);
        engine.submit_payout(&room, &payouts).await.expect("payout");
        // Change landed back on seat 0's escrow address instead of the treasury.
        assert_eq!(ledger.balance(&room.seats[0].deposit_address), 100);
        assert_eq!(ledger.balance("other1treasury"), 0);
    }
}
