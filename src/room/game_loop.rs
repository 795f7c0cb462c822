//! Turn loop and game resolution
//!
//! Runs once per locked room: wait for the settlement block, fix the chamber
//! arrangement, then drive turns until the mode's win condition. Any failure
//! inside the loop is caught at the top level and force-aborts the room with a
//! best-effort refund; a room is never left silently stuck with funds in escrow.

use crate::errors::{GameError, GameResult};
use crate::events::RoomEvent;
use crate::fairness;
use crate::room::manager::RoomManager;
use crate::room::pending::{PendingGame, TurnRelease};
use crate::room::types::{Room, RoomMode, RoomState, Round, Seat};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Loop-local copy of the transient game state. The pending pool keeps the
/// authoritative shooter/round counters for pull validation; the loop works from
/// this snapshot so its draws are unaffected by concurrent map access.
struct GameContext {
    block_hash: String,
    server_seed: String,
    client_seeds: Vec<String>,
    chambers: Vec<bool>,
    turn_order: Vec<u32>,
}

/// Entry point spawned after a room locks.
pub(crate) async fn run_locked_room(manager: Arc<RoomManager>, room_id: String) {
    if let Err(err) = drive(&manager, &room_id).await {
        error!(room_id, error = %err, "game loop failed, force-aborting");
        if let Err(abort_err) = manager.abort_room(&room_id, "game loop failure").await {
            error!(room_id, error = %abort_err, "force-abort after loop failure also failed");
        }
    }
}

async fn drive(manager: &Arc<RoomManager>, room_id: &str) -> GameResult<()> {
    if !wait_for_settlement_height(manager, room_id).await? {
        return Ok(());
    }
    let Some((room, context)) = start_game(manager, room_id).await? else {
        return Ok(());
    };
    run_turn_loop(manager, room, context).await
}

/// Poll the chain until the settlement block exists. A transient failure backs
/// off and retries; a failure on the very first poll aborts instead, failing
/// fast on total chain unavailability. Returns false when the room stopped being
/// LOCKED underneath us.
async fn wait_for_settlement_height(
    manager: &Arc<RoomManager>,
    room_id: &str,
) -> GameResult<bool> {
    let room = manager.fetch_room(room_id).await?;
    let target = room
        .settlement_block_height
        .ok_or(GameError::WrongState {
            expected: "LOCKED with a settlement height",
            actual: room.state.to_string(),
        })?;

    let mut first_poll = true;
    loop {
        let room = manager.fetch_room(room_id).await?;
        if room.state != RoomState::Locked {
            return Ok(false);
        }
        match manager.ledger.current_height().await {
            Ok(height) if height >= target => return Ok(true),
            Ok(_) => {
                first_poll = false;
                sleep(manager.config.height_poll_interval()).await;
            }
            Err(err) if first_poll => {
                warn!(room_id, error = %err, "chain unreachable on first settlement poll, failing closed");
                manager
                    .abort_room(room_id, "chain unavailable while waiting for settlement height")
                    .await?;
                return Ok(false);
            }
            Err(err) => {
                warn!(room_id, error = %err, "settlement height poll failed, backing off");
                first_poll = false;
                sleep(manager.config.height_poll_backoff()).await;
            }
        }
    }
}

/// Fix the turn order and chamber arrangement, transition to PLAYING, and
/// announce the game publicly.
async fn start_game(
    manager: &Arc<RoomManager>,
    room_id: &str,
) -> GameResult<Option<(Room, GameContext)>> {
    let mut room = manager.fetch_room(room_id).await?;
    if room.state != RoomState::Locked {
        return Ok(None);
    }
    let Some(server_seed) = manager.seeds.get(room_id) else {
        warn!(room_id, "secret seed missing at game start");
        manager.abort_room(room_id, "secret seed unavailable").await?;
        return Ok(None);
    };
    let settlement_height = room.settlement_block_height.ok_or(GameError::WrongState {
        expected: "LOCKED with a settlement height",
        actual: room.state.to_string(),
    })?;
    let block_hash = match manager.ledger.block_hash_at(settlement_height).await {
        Ok(hash) => hash,
        Err(err) => {
            warn!(room_id, error = %err, "settlement block hash fetch failed, failing closed");
            manager.abort_room(room_id, "settlement block hash unavailable").await?;
            return Ok(None);
        }
    };

    let turn_order = room.turn_order();
    let client_seeds = room.client_seeds();
    let (total_chambers, bullet_count) = room.mode.chamber_layout(turn_order.len());
    let chambers = fairness::chamber_assignment(
        &server_seed,
        &client_seeds,
        room_id,
        &block_hash,
        bullet_count,
        total_chambers,
    );

    // CAS into PLAYING before inserting pending state: the losing chain of a
    // duplicate spawn must not touch the winner's pending entry.
    if !manager
        .store
        .transition_state(room_id, RoomState::Locked, RoomState::Playing)
        .await?
    {
        return Ok(None);
    }
    manager.pending.insert(PendingGame::new(
        room_id.to_string(),
        block_hash.clone(),
        server_seed.clone(),
        client_seeds.clone(),
        chambers.clone(),
        turn_order.clone(),
    ));
    manager
        .store
        .set_current_turn(room_id, turn_order.first().copied())
        .await?;
    room.state = RoomState::Playing;
    room.current_turn_seat_index = turn_order.first().copied();
    info!(room_id, ?turn_order, total_chambers, bullet_count, "game started");

    manager.events.publish(RoomEvent::GameStart {
        room_id: room_id.to_string(),
        lock_height: room.lock_height.unwrap_or_default(),
        settlement_block_height: settlement_height,
        server_commit: room.server_commit.clone(),
        turn_order: turn_order.clone(),
        seats: room.seats.clone(),
    });

    Ok(Some((
        room,
        GameContext {
            block_hash,
            server_seed,
            client_seeds,
            chambers,
            turn_order,
        },
    )))
}

/// Next living seat cyclically following `previous` in the fixed order, skipping
/// the dead without ever repeating or omitting a living seat.
fn next_living(order: &[u32], alive: &HashSet<u32>, previous: Option<u32>) -> Option<u32> {
    if order.is_empty() {
        return None;
    }
    let start = match previous {
        None => 0,
        Some(prev) => order.iter().position(|&s| s == prev).map(|p| p + 1).unwrap_or(0),
    };
    (0..order.len())
        .map(|offset| order[(start + offset) % order.len()])
        .find(|seat| alive.contains(seat))
}

fn game_over(mode: RoomMode, seats: &[Seat]) -> bool {
    let alive = seats.iter().filter(|s| s.alive).count();
    match mode {
        // Single elimination: the first death (or forfeit) ends the game.
        RoomMode::Regular => alive < seats.len(),
        RoomMode::Extreme => alive <= 1,
    }
}

async fn run_turn_loop(
    manager: &Arc<RoomManager>,
    room: Room,
    context: GameContext,
) -> GameResult<()> {
    let room_id = room.id.clone();
    let mut previous_shooter: Option<u32> = None;

    loop {
        let room = manager.fetch_room(&room_id).await?;
        if room.state != RoomState::Playing {
            // Aborted underneath us; the abort path owns cleanup.
            return Ok(());
        }
        if game_over(room.mode, &room.seats) {
            return settle(manager, room, &context).await;
        }

        let alive: HashSet<u32> = room.alive_seat_indices().into_iter().collect();
        let Some(shooter) = next_living(&context.turn_order, &alive, previous_shooter) else {
            return settle(manager, room, &context).await;
        };
        previous_shooter = Some(shooter);

        let Some(round_index) = manager.pending.current_round(&room_id) else {
            // Pending state dropped: the room was aborted.
            return Ok(());
        };
        // Scoped write: only the turn pointer moves, so a forfeit persisted
        // since the fetch above is not overwritten.
        manager.store.set_current_turn(&room_id, Some(shooter)).await?;

        // Arm before announcing so a prompt pull cannot race the wait.
        let Some(receiver) = manager.pending.arm_turn(&room_id, shooter) else {
            return Ok(());
        };
        manager.events.publish(RoomEvent::TurnStart {
            room_id: room_id.clone(),
            seat_index: shooter,
            wallet_address: room
                .seat_by_index(shooter)
                .and_then(|s| s.wallet_address.clone()),
            round_index,
        });

        // Wait for the shooter's pull, racing a timeout. Timeout proceeds as an
        // automatic pull so unattended seats cannot stall the game.
        let release = tokio::select! {
            result = receiver => match result {
                Ok(release) => Some(release),
                // Pending state dropped: the room was aborted.
                Err(_) => return Ok(()),
            },
            _ = sleep(manager.config.turn_timeout()) => {
                manager.pending.disarm_turn(&room_id);
                info!(room_id, seat = shooter, "turn timed out, auto-pulling");
                None
            }
        };

        let room = manager.fetch_room(&room_id).await?;
        if room.state != RoomState::Playing {
            return Ok(());
        }
        if release == Some(TurnRelease::Forfeit) {
            // The seat is already marked dead; no chamber is consumed.
            continue;
        }

        let randomness = fairness::round_randomness_hex(
            &context.server_seed,
            &context.client_seeds,
            &room_id,
            round_index as i64,
            &context.block_hash,
        );
        let chamber = round_index as usize % context.chambers.len();
        let died = context.chambers[chamber];

        if died {
            if let Some(seat) = room.seat_by_index(shooter) {
                let mut seat = seat.clone();
                seat.alive = false;
                manager.store.update_seat(&room_id, &seat).await?;
            }
            info!(room_id, seat = shooter, round = round_index, "chamber was loaded");
        }

        let round = Round {
            index: round_index,
            shooter_seat_index: shooter,
            died,
            randomness,
            timestamp: Utc::now(),
        };
        manager.store.append_round(&room_id, round.clone()).await?;
        manager.pending.advance_round(&room_id);

        let room = manager.fetch_room(&room_id).await?;
        manager.events.publish(RoomEvent::RoundResult {
            room_id: room_id.clone(),
            round,
            alive: room.alive_seat_indices(),
            dead: room.dead_seat_indices(),
        });

        // Presentation pacing only.
        sleep(manager.config.round_pacing()).await;
    }
}

/// Settle the finished game: persist payouts, attempt the on-chain payout, then
/// reveal the secret seed and purge it from memory. A failed payout still
/// settles the room; a sentinel marker stands in for the transaction id.
async fn settle(
    manager: &Arc<RoomManager>,
    room: Room,
    context: &GameContext,
) -> GameResult<()> {
    let survivors: Vec<Seat> = room.seats.iter().filter(|s| s.alive).cloned().collect();
    let survivor_refs: Vec<&Seat> = survivors.iter().collect();
    let (breakdown, payouts) = manager.settlement.build_payouts(&room, &survivor_refs);
    manager.store.add_payouts(&room.id, &payouts).await?;

    let payout_tx_id = if payouts.is_empty() {
        info!(room_id = %room.id, "no survivors; the house retains the pot");
        None
    } else {
        match manager.settlement.submit_payout(&room, &payouts).await {
            Ok(tx_id) => Some(tx_id),
            Err(err) => {
                error!(room_id = %room.id, error = %err, "payout failed; settling anyway");
                Some(crate::settlement::PAYOUT_FAILED_MARKER.to_string())
            }
        }
    };

    let server_seed = manager
        .seeds
        .take(&room.id)
        .unwrap_or_else(|| context.server_seed.clone());
    // CAS into SETTLED; losing means an abort landed first and owns the
    // terminal state.
    if !manager
        .store
        .mark_settled(&room.id, &server_seed, payout_tx_id.as_deref())
        .await?
    {
        manager.pending.remove(&room.id);
        return Ok(());
    }
    manager.pending.remove(&room.id);
    info!(
        room_id = %room.id,
        pot = breakdown.pot,
        house_cut = breakdown.house_cut,
        per_survivor = breakdown.per_survivor,
        survivors = survivors.len(),
        "room settled"
    );

    let room = manager.fetch_room(&room.id).await?;
    manager.events.publish(RoomEvent::GameEnd {
        room_id: room.id.clone(),
        survivors: survivors.iter().map(|s| s.index).collect(),
        payouts,
        payout_tx_id,
    });
    manager.events.publish(RoomEvent::FairnessReveal {
        room_id: room.id.clone(),
        server_seed,
        client_seeds: context.client_seeds.clone(),
        block_hash: context.block_hash.clone(),
        rounds: room.rounds.clone(),
    });
    manager.events.publish(RoomEvent::RoomUpdate { room: room.clone() });
    manager.events.close_room(&room.id);
    Ok(())
}
