//! Provably-fair randomness: commit-reveal plus block-hash anchoring
//!
//! The server commits to a secret seed before any deposit is requested. Every round
//! draw mixes the secret seed, all player-supplied seeds, the room id, the round
//! index, and the hash of a block that was not yet mined at lock time. After
//! settlement the seed is revealed and every draw is recomputable from public data.
//!
//! Protocol details fixed here and relied on by both sides of the reveal:
//! - keyed SHA-256 with length-prefixed fields (no concatenation ambiguity),
//! - chamber generation uses negative draw indices so its draws can never collide
//!   with in-game round indices (which count up from zero),
//! - chamber slots come from rejection sampling, not naive modulo.

use rand::RngCore;
use sha2::{Digest, Sha256};

const RANDOMNESS_DOMAIN: &[u8] = b"sixgun/round/v1";

/// Generate a fresh 32-byte secret seed, hex-encoded.
pub fn generate_server_seed() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Public commitment to a secret seed: SHA-256 of the seed string.
pub fn commit(server_seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(server_seed.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a revealed seed against a previously published commitment.
pub fn verify_commit(server_seed: &str, commitment: &str) -> bool {
    commit(server_seed) == commitment
}

fn update_len_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Deterministic randomness for one draw.
///
/// In-game rounds use indices 0, 1, 2, …; chamber-generation draws use −1, −2, ….
/// Client seeds are hashed in the caller-supplied order, which both sides of the
/// reveal fix as seat-index order.
pub fn round_randomness(
    server_seed: &str,
    client_seeds: &[String],
    room_id: &str,
    round_index: i64,
    block_hash: &str,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(RANDOMNESS_DOMAIN);
    update_len_prefixed(&mut hasher, server_seed.as_bytes());
    update_len_prefixed(&mut hasher, room_id.as_bytes());
    hasher.update((client_seeds.len() as u64).to_le_bytes());
    for seed in client_seeds {
        update_len_prefixed(&mut hasher, seed.as_bytes());
    }
    update_len_prefixed(&mut hasher, block_hash.as_bytes());
    hasher.update(round_index.to_le_bytes());
    hasher.finalize().into()
}

/// Hex form of a round draw as it appears in round records and the reveal.
pub fn round_randomness_hex(
    server_seed: &str,
    client_seeds: &[String],
    room_id: &str,
    round_index: i64,
    block_hash: &str,
) -> String {
    hex::encode(round_randomness(
        server_seed,
        client_seeds,
        room_id,
        round_index,
        block_hash,
    ))
}

/// Reveal-side check of a single recorded round draw.
pub fn verify_round(
    server_seed: &str,
    client_seeds: &[String],
    room_id: &str,
    round_index: i64,
    block_hash: &str,
    expected_randomness_hex: &str,
) -> bool {
    round_randomness_hex(server_seed, client_seeds, room_id, round_index, block_hash)
        == expected_randomness_hex
}

/// Map one 32-byte draw into `0..n` without modulo bias.
///
/// Returns `None` when the draw falls in the rejection zone; the caller then moves
/// on to the next draw index.
fn sample_slot(randomness: &[u8; 32], n: u64) -> Option<u64> {
    let value = u64::from_le_bytes(randomness[..8].try_into().expect("8 bytes"));
    let zone = (u64::MAX / n) * n;
    if value < zone {
        Some(value % n)
    } else {
        None
    }
}

/// Precompute the full chamber arrangement for a game.
///
/// Exactly `bullet_count` distinct chambers are marked lethal. Draws that reject
/// or collide with an already-marked chamber advance to the next negative index.
/// The arrangement is fully fixed before the first trigger pull.
pub fn chamber_assignment(
    server_seed: &str,
    client_seeds: &[String],
    room_id: &str,
    block_hash: &str,
    bullet_count: usize,
    total_chambers: usize,
) -> Vec<bool> {
    let mut chambers = vec![false; total_chambers];
    if total_chambers == 0 {
        return chambers;
    }
    if bullet_count >= total_chambers {
        chambers.iter_mut().for_each(|c| *c = true);
        return chambers;
    }

    let mut placed = 0usize;
    let mut draw_index: i64 = -1;
    while placed < bullet_count {
        let randomness =
            round_randomness(server_seed, client_seeds, room_id, draw_index, block_hash);
        draw_index -= 1;
        let slot = match sample_slot(&randomness, total_chambers as u64) {
            Some(slot) => slot as usize,
            None => continue,
        };
        if !chambers[slot] {
            chambers[slot] = true;
            placed += 1;
        }
    }
    chambers
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_HASH: &str = "1f2e3d4c5b6a79880716253443526170aabbccddeeff00112233445566778899";

    #[test]
    fn commit_round_trips() {
        let seed = generate_server_seed();
        let commitment = commit(&seed);
        assert!(verify_commit(&seed, &commitment));
        assert!(!verify_commit("wrong-seed", &commitment));
    }

    #[test]
    fn seeds_are_unique() {
        assert_ne!(generate_server_seed(), generate_server_seed());
    }

    #[test]
    fn randomness_is_deterministic_and_input_sensitive() {
        let seeds = vec!["alpha".to_string(), "beta".to_string()];
        let a = round_randomness("seed", &seeds, "room", 0, BLOCK_HASH);
        let b = round_randomness("seed", &seeds, "room", 0, BLOCK_HASH);
        assert_eq!(a, b);

        assert_ne!(a, round_randomness("seed", &seeds, "room", 1, BLOCK_HASH));
        assert_ne!(a, round_randomness("seed2", &seeds, "room", 0, BLOCK_HASH));
        assert_ne!(a, round_randomness("seed", &seeds, "room2", 0, BLOCK_HASH));
        assert_ne!(a, round_randomness("seed", &[], "room", 0, BLOCK_HASH));
    }

    #[test]
    fn length_prefixing_prevents_seed_ambiguity() {
        // ["ab", "c"] and ["a", "bc"] concatenate identically; the length prefixes
        // must keep their draws distinct.
        let a = round_randomness(
            "seed",
            &["ab".to_string(), "c".to_string()],
            "room",
            0,
            BLOCK_HASH,
        );
        let b = round_randomness(
            "seed",
            &["a".to_string(), "bc".to_string()],
            "room",
            0,
            BLOCK_HASH,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn chamber_assignment_places_exact_bullet_count() {
        for (bullets, chambers) in [(1, 6), (2, 9), (5, 18), (0, 6)] {
            let assignment =
                chamber_assignment("seed", &[], "room", BLOCK_HASH, bullets, chambers);
            assert_eq!(assignment.len(), chambers);
            assert_eq!(
                assignment.iter().filter(|c| **c).count(),
                bullets,
                "{} bullets in {} chambers",
                bullets,
                chambers
            );
        }
    }

    #[test]
    fn chamber_assignment_is_deterministic() {
        let seeds = vec!["player-seed".to_string()];
        let a = chamber_assignment("seed", &seeds, "room", BLOCK_HASH, 2, 12);
        let b = chamber_assignment("seed", &seeds, "room", BLOCK_HASH, 2, 12);
        assert_eq!(a, b);
    }

    #[test]
    fn chamber_assignment_saturates_when_bullets_exceed_chambers() {
        let assignment = chamber_assignment("seed", &[], "room", BLOCK_HASH, 9, 6);
        assert!(assignment.iter().all(|c| *c));
    }

    #[test]
    fn chamber_draws_never_reuse_round_indices() {
        // A chamber draw at index -1 must differ from the round-0 draw even with
        // otherwise identical inputs.
        let a = round_randomness("seed", &[], "room", -1, BLOCK_HASH);
        let b = round_randomness("seed", &[], "room", 0, BLOCK_HASH);
        assert_ne!(a, b);
    }

    #[test]
    fn recorded_rounds_verify_from_public_data() {
        let seeds = vec!["client-a".to_string(), "client-b".to_string()];
        let recorded = round_randomness_hex("seed", &seeds, "room", 4, BLOCK_HASH);
        assert!(verify_round("seed", &seeds, "room", 4, BLOCK_HASH, &recorded));
        assert!(!verify_round("seed", &seeds, "room", 5, BLOCK_HASH, &recorded));
    }
}
