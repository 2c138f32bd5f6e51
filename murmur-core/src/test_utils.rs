// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{Mailserver, PeerId, PrivateKey};

/// Deterministic private key derived from a seed byte.
///
/// Seeds must be non-zero, a zero scalar is not a valid secp256k1 key.
pub fn private_key_from_seed(seed: u8) -> PrivateKey {
    assert_ne!(seed, 0, "zero is not a valid private key");
    PrivateKey::from_bytes(&[seed; 32]).expect("non-zero scalar below curve order")
}

/// Deterministic mailserver with an address derived from its seed.
pub fn mailserver_from_seed(seed: u8) -> Mailserver {
    Mailserver::new(
        PeerId::from_bytes([seed; 32]),
        format!("enode://{}@127.0.0.1:{}", hex::encode([seed; 32]), 30300 + u16::from(seed)),
    )
}
