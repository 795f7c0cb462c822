//! Deterministic per-room, per-seat key and address derivation
//!
//! Pure functions of a root secret: the same (room, seat) pair always derives the
//! same address, which is what lets settlement re-derive every signing key without
//! storing any of them.

use sha2::{Digest, Sha256};

const KEY_DOMAIN: &[u8] = b"sixgun/seat-key/v1";
const PUB_DOMAIN: &[u8] = b"sixgun/seat-pub/v1";

/// Derived signing material for one seat's deposit address.
#[derive(Debug, Clone)]
pub struct SeatKeypair {
    pub public_key: String,
    pub secret_key: String,
}

/// Deterministic address/keypair derivation contract.
pub trait KeyDerivation: Send + Sync {
    /// Unique deposit address for a seat. Stable across calls.
    fn seat_address(&self, room_id: &str, seat_index: u32) -> String;

    /// Signing keypair controlling that seat's deposit address.
    fn seat_keypair(&self, room_id: &str, seat_index: u32) -> SeatKeypair;
}

/// Hash-chain derivation from a single root secret.
pub struct HdKeyDerivation {
    root_secret: Vec<u8>,
    address_prefix: String,
}

impl HdKeyDerivation {
    pub fn new(root_secret: impl Into<Vec<u8>>, address_prefix: impl Into<String>) -> Self {
        Self {
            root_secret: root_secret.into(),
            address_prefix: address_prefix.into(),
        }
    }

    pub fn address_prefix(&self) -> &str {
        &self.address_prefix
    }

    fn derive(&self, domain: &[u8], room_id: &str, seat_index: u32) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(&self.root_secret);
        hasher.update(room_id.as_bytes());
        hasher.update(seat_index.to_le_bytes());
        hasher.finalize().into()
    }
}

impl KeyDerivation for HdKeyDerivation {
    fn seat_address(&self, room_id: &str, seat_index: u32) -> String {
        let keypair = self.seat_keypair(room_id, seat_index);
        let pub_bytes = hex::decode(&keypair.public_key).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&pub_bytes);
        let digest = hasher.finalize();
        format!("{}{}", self.address_prefix, &hex::encode(digest)[..40])
    }

    fn seat_keypair(&self, room_id: &str, seat_index: u32) -> SeatKeypair {
        let secret = self.derive(KEY_DOMAIN, room_id, seat_index);
        let mut hasher = Sha256::new();
        hasher.update(PUB_DOMAIN);
        hasher.update(secret);
        let public: [u8; 32] = hasher.finalize().into();
        SeatKeypair {
            public_key: hex::encode(public),
            secret_key: hex::encode(secret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derivation() -> HdKeyDerivation {
        HdKeyDerivation::new(b"test-root-secret".to_vec(), "six1")
    }

    #[test]
    fn derivation_is_deterministic() {
        let keys = derivation();
        assert_eq!(keys.seat_address("room-a", 0), keys.seat_address("room-a", 0));
        assert_eq!(
            keys.seat_keypair("room-a", 3).secret_key,
            keys.seat_keypair("room-a", 3).secret_key
        );
    }

    #[test]
    fn addresses_are_unique_per_seat_and_room() {
        let keys = derivation();
        let a0 = keys.seat_address("room-a", 0);
        let a1 = keys.seat_address("room-a", 1);
        let b0 = keys.seat_address("room-b", 0);
        assert_ne!(a0, a1);
        assert_ne!(a0, b0);
        assert!(a0.starts_with("six1"));
    }
}
