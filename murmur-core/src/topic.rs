// SPDX-License-Identifier: MIT OR Apache-2.0

//! Network topics and the derivation of chat identifiers for every conversation type.
//!
//! All functions in this module are pure and deterministic. Their output has to match byte for
//! byte with what other peers compute, otherwise messages are silently routed to topics nobody
//! listens on.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::Hash;
use crate::identity::PublicKey;
use crate::serde::impl_hex_serde;

/// Size of network topics.
pub const TOPIC_LENGTH: usize = 4;

/// Well-known chat identifier used for contact discovery.
pub const DISCOVERY_TOPIC: &str = "contact-discovery";

/// Number of buckets public keys are partitioned into.
pub const PARTITIONS_NUM: u64 = 5000;

const CONTACT_CODE_TOPIC_SUFFIX: &str = "-contact-code";

const NEGOTIATED_TOPIC_SUFFIX: &str = "-negotiated";

/// 4-byte routing key used by the pub-sub network to group messages.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic([u8; TOPIC_LENGTH]);

impl Topic {
    pub const fn from_bytes(bytes: [u8; TOPIC_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOPIC_LENGTH] {
        &self.0
    }
}

impl From<[u8; TOPIC_LENGTH]> for Topic {
    fn from(topic: [u8; TOPIC_LENGTH]) -> Self {
        Self(topic)
    }
}

impl From<Topic> for [u8; TOPIC_LENGTH] {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl From<Hash> for Topic {
    /// Truncates the hash to its first four bytes.
    fn from(value: Hash) -> Self {
        let mut topic = [0; TOPIC_LENGTH];
        topic.copy_from_slice(&value.as_bytes()[..TOPIC_LENGTH]);
        Self(topic)
    }
}

impl TryFrom<&[u8]> for Topic {
    type Error = TopicError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value_len = value.len();

        let checked_value: [u8; TOPIC_LENGTH] = value
            .try_into()
            .map_err(|_| TopicError::InvalidLength(value_len, TOPIC_LENGTH))?;

        Ok(Self::from(checked_value))
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.strip_prefix("0x").unwrap_or(value);
        Self::try_from(hex::decode(value)?.as_slice())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Topic").field(&hex::encode(self.0)).finish()
    }
}

impl_hex_serde!(Topic);

#[derive(Error, Debug)]
pub enum TopicError {
    /// Invalid number of bytes.
    #[error("invalid bytes length of {0}, expected {1} bytes")]
    InvalidLength(usize, usize),

    #[error("invalid hex encoding in topic string")]
    InvalidHexEncoding(#[from] hex::FromHexError),
}

/// Network topic of a chat: the first four bytes of the Keccak-256 hash of its identifier.
pub fn topic_for(chat_id: &str) -> Topic {
    Topic::from(Hash::new(chat_id.as_bytes()))
}

/// Chat identifier of the well-known discovery topic.
pub fn discovery_topic() -> String {
    DISCOVERY_TOPIC.to_string()
}

/// Chat identifier of the discovery topic only the owner of `public_key` listens on.
pub fn personal_discovery_topic(public_key: &PublicKey) -> String {
    format!("{DISCOVERY_TOPIC}-{}", public_key.to_hex())
}

/// Index of the partition a public key belongs to.
///
/// This is the big-endian X coordinate of the key reduced modulo [`PARTITIONS_NUM`].
pub fn partition(public_key: &PublicKey) -> u64 {
    public_key
        .x_coordinate()
        .iter()
        .fold(0, |acc, byte| (acc * 256 + u64::from(*byte)) % PARTITIONS_NUM)
}

/// Chat identifier of the partition a public key belongs to.
///
/// Senders can reach a recipient on this topic without knowing any other topic in advance.
pub fn partitioned_topic(public_key: &PublicKey) -> String {
    format!("{DISCOVERY_TOPIC}-{}", partition(public_key))
}

/// Chat identifier for messages encrypted with a secret negotiated with `public_key`.
pub fn negotiated_topic(public_key: &PublicKey) -> String {
    format!("0x{}{NEGOTIATED_TOPIC_SUFFIX}", public_key.to_hex())
}

/// Chat identifier where the owner of `public_key` advertises their contact code.
pub fn contact_code_topic(public_key: &PublicKey) -> String {
    format!("0x{}{CONTACT_CODE_TOPIC_SUFFIX}", public_key.to_hex())
}

#[cfg(test)]
mod tests {
    use crate::identity::PrivateKey;

    use super::*;

    fn public_key() -> PublicKey {
        PrivateKey::from_bytes(&[1; 32]).unwrap().public_key()
    }

    #[test]
    fn topic_is_truncated_keccak() {
        let topic = topic_for("status");
        assert_eq!(
            topic.as_bytes()[..],
            Hash::new("status".as_bytes()).as_bytes()[..4]
        );
        assert_eq!(topic, topic_for("status"));
        assert_ne!(topic, topic_for("status-2"));
    }

    #[test]
    fn topics_match_known_values() {
        assert_eq!(topic_for("status").to_string(), "0xcd423760");
        assert_eq!(topic_for(&discovery_topic()).to_string(), "0xf8946aac");

        let key = public_key();
        assert_eq!(
            hex::encode(key.x_coordinate()),
            "1b84c5567b126440995d3ed5aaba0565d71e1834604819ff9c17f5e9d5dd078f"
        );
        assert_eq!(partition(&key), 2095);
        assert_eq!(partitioned_topic(&key), "contact-discovery-2095");
        assert_eq!(topic_for(&partitioned_topic(&key)).to_string(), "0xc41d2471");

        let other = PrivateKey::from_bytes(&[2; 32]).unwrap().public_key();
        assert_eq!(partitioned_topic(&other), "contact-discovery-2846");
    }

    #[test]
    fn discovery_topics() {
        let key = public_key();
        assert_eq!(discovery_topic(), "contact-discovery");
        assert_eq!(
            personal_discovery_topic(&key),
            format!("contact-discovery-{}", key.to_hex())
        );
        assert!(personal_discovery_topic(&key).len() > DISCOVERY_TOPIC.len() + 130);
    }

    #[test]
    fn partition_matches_big_integer_modulo() {
        let key = public_key();

        // Reference computation over 128-bit chunks: (hi * 2^128 + lo) mod n.
        let x = key.x_coordinate();
        let hi = u128::from_be_bytes(x[..16].try_into().unwrap());
        let lo = u128::from_be_bytes(x[16..].try_into().unwrap());
        let n = u128::from(PARTITIONS_NUM);
        let shift = (u128::MAX % n + 1) % n;
        let expected = ((hi % n) * shift % n + lo % n) % n;

        assert_eq!(u128::from(partition(&key)), expected);
        assert!(partition(&key) < PARTITIONS_NUM);
        assert_eq!(
            partitioned_topic(&key),
            format!("contact-discovery-{expected}")
        );
    }

    #[test]
    fn key_bound_topics() {
        let key = public_key();
        let hex = key.to_hex();
        assert_eq!(negotiated_topic(&key), format!("0x{hex}-negotiated"));
        assert_eq!(contact_code_topic(&key), format!("0x{hex}-contact-code"));
        assert_ne!(topic_for(&negotiated_topic(&key)), topic_for(&partitioned_topic(&key)));
    }

    #[test]
    fn parse_topic() {
        let topic = topic_for("status");
        let parsed: Topic = topic.to_string().parse().unwrap();
        assert_eq!(parsed, topic);
        assert!(matches!(
            "0x0102".parse::<Topic>(),
            Err(TopicError::InvalidLength(2, 4))
        ));
    }
}
