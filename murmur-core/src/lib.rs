// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data types shared by the murmur transport: 4-byte network topics and the derivation of chat
//! identifiers, secp256k1 identities and symmetric keys, Keccak-256 hashes, topic bloom filters,
//! mailserver requests and the events the network layer reports about them.
pub mod bloom;
pub mod events;
pub mod hash;
pub mod identity;
pub mod peer;
pub mod request;
mod serde;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod topic;

pub use bloom::{Bloom, bloom_match, combine_bloom, topic_to_bloom, topics_to_bloom};
pub use events::{EnvelopeEvent, EnvelopeEventType, PeerEvent};
pub use hash::{Hash, HashError};
pub use identity::{IdentityError, PrivateKey, PublicKey, SymmetricKey};
pub use peer::{Mailserver, PeerId, PeerIdError, ShortFormat};
pub use request::{Cursor, MailServerResponse, MessagesRequest, RequestError, TopicMatching};
pub use topic::{
    Topic, TopicError, contact_code_topic, discovery_topic, negotiated_topic, partitioned_topic,
    personal_discovery_topic, topic_for,
};

/// Seconds since the unix epoch, zero if the system clock is set before it.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

/// Envelope timestamp of the current time.
pub fn current_envelope_timestamp() -> u32 {
    envelope_timestamp(current_timestamp())
}

/// Converts unix seconds to the 32-bit envelope format, saturating at its last second.
pub fn envelope_timestamp(secs: u64) -> u32 {
    u32::try_from(secs).unwrap_or(u32::MAX)
}
