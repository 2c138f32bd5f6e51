// SPDX-License-Identifier: MIT OR Apache-2.0

//! Historic message requests sent to mailservers and their responses.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::bloom::{Bloom, bloom_match, topic_to_bloom, topics_to_bloom};
use crate::hash::HASH_LEN;
use crate::{Hash, Topic};

/// Default number of envelopes a mailserver returns per page.
pub const DEFAULT_LIMIT: u32 = 100;

/// Default time range of a request when no start is given.
pub const DEFAULT_RANGE_SECS: u32 = 24 * 60 * 60;

/// Default number of seconds after which the network layer expires a request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u32 = 10;

/// Cursors are the hash of the last delivered envelope followed by its big-endian timestamp.
pub const CURSOR_LENGTH: usize = HASH_LEN + 4;

/// Opaque pagination token handed out by mailservers. An empty cursor requests the first page.
pub type Cursor = Vec<u8>;

/// How a mailserver should select envelopes for the requested topics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicMatching {
    /// Send exact topics next to the bloom, for mailservers supporting topic lookups.
    #[default]
    Exact,

    /// Send only the combined bloom, for mailservers which only understand blooms.
    BloomOnly,
}

/// Request for historic envelopes within a time range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagesRequest {
    /// Unique identifier, network events about this request carry it as their hash.
    pub id: Hash,

    /// Lower bound of the time range in unix seconds.
    pub from: u32,

    /// Upper bound of the time range in unix seconds.
    pub to: u32,

    pub limit: u32,

    pub cursor: Cursor,

    /// Bitwise OR of the blooms of all requested topics.
    pub bloom: Bloom,

    /// Exact topics, empty when requesting by bloom only.
    pub topics: Vec<Topic>,

    /// Seconds after which the network layer considers the request expired.
    pub timeout: u32,
}

impl MessagesRequest {
    /// Create a request for the given topics with a fresh identifier and default limit.
    pub fn new(
        from: u32,
        to: u32,
        cursor: Cursor,
        topics: &[Topic],
        matching: TopicMatching,
    ) -> Self {
        let bloom = topics_to_bloom(topics);
        let topics = match matching {
            TopicMatching::Exact => topics.to_vec(),
            TopicMatching::BloomOnly => Vec::new(),
        };

        Self {
            id: new_request_id(),
            from,
            to,
            limit: DEFAULT_LIMIT,
            cursor,
            bloom,
            topics,
            timeout: 0,
        }
    }

    /// Fills unset fields: `to` becomes `now`, `from` one day before `to` and the timeout its
    /// default.
    pub fn set_defaults(&mut self, now: u32) {
        if self.to == 0 {
            self.to = now;
        }

        if self.from == 0 {
            self.from = self.to.saturating_sub(DEFAULT_RANGE_SECS);
        }

        if self.timeout == 0 {
            self.timeout = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.from > self.to {
            return Err(RequestError::InvalidRange {
                from: self.from,
                to: self.to,
            });
        }

        if !self.cursor.is_empty() && self.cursor.len() != CURSOR_LENGTH {
            return Err(RequestError::InvalidCursorLength(self.cursor.len()));
        }

        Ok(())
    }

    /// Returns `true` if an envelope with this topic should be delivered for the request.
    ///
    /// Exact topics take precedence, otherwise the bloom decides.
    pub fn matches(&self, topic: &Topic) -> bool {
        if self.topics.is_empty() {
            bloom_match(&self.bloom, &topic_to_bloom(topic))
        } else {
            self.topics.contains(topic)
        }
    }
}

/// Generates a request identifier from a random UUID.
///
/// The hex encoding of the 16 UUID bytes is exactly as long as an envelope hash, which is how
/// the network layer refers to the request in its events.
fn new_request_id() -> Hash {
    let encoded = hex::encode(Uuid::new_v4().as_bytes());
    let mut id = [0; HASH_LEN];
    id.copy_from_slice(encoded.as_bytes());
    Hash::from_bytes(id)
}

/// Response of a mailserver after it delivered a page of envelopes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailServerResponse {
    /// Hash of the last envelope sent for this page.
    pub last_envelope_hash: Hash,

    /// Cursor to request the next page with, empty when there is nothing left.
    pub cursor: Cursor,

    /// Failure reported by the mailserver while processing the request.
    pub error: Option<String>,
}

impl MailServerResponse {
    pub fn is_last_page(&self) -> bool {
        self.cursor.is_empty()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("query range is invalid: from {from} > to {to}")]
    InvalidRange { from: u32, to: u32 },

    #[error("invalid cursor length of {0} bytes, expected 36 bytes")]
    InvalidCursorLength(usize),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::bloom::topic_to_bloom;
    use crate::topic::topic_for;

    use super::*;

    #[test]
    fn fresh_ids() {
        let topics = [topic_for("status")];
        let request_1 = MessagesRequest::new(0, 0, Vec::new(), &topics, TopicMatching::Exact);
        let request_2 = MessagesRequest::new(0, 0, Vec::new(), &topics, TopicMatching::Exact);
        assert_ne!(request_1.id, request_2.id);

        // Identifier is printable hex of a UUID.
        let id = std::str::from_utf8(request_1.id.as_bytes()).unwrap();
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(request_1.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn defaults() {
        let mut request = MessagesRequest::new(0, 0, Vec::new(), &[], TopicMatching::Exact);
        request.set_defaults(1_000_000);
        assert_eq!(request.to, 1_000_000);
        assert_eq!(request.from, 1_000_000 - DEFAULT_RANGE_SECS);
        assert_eq!(request.timeout, DEFAULT_REQUEST_TIMEOUT_SECS);

        // Early clocks don't underflow.
        let mut request = MessagesRequest::new(0, 0, Vec::new(), &[], TopicMatching::Exact);
        request.set_defaults(100);
        assert_eq!(request.from, 0);

        // Explicit values are kept.
        let mut request = MessagesRequest::new(5, 10, Vec::new(), &[], TopicMatching::Exact);
        request.timeout = 30;
        request.set_defaults(1_000_000);
        assert_eq!((request.from, request.to, request.timeout), (5, 10, 30));
    }

    #[test]
    fn validation() {
        let request = MessagesRequest::new(10, 5, Vec::new(), &[], TopicMatching::Exact);
        assert_matches!(
            request.validate(),
            Err(RequestError::InvalidRange { from: 10, to: 5 })
        );

        let request = MessagesRequest::new(5, 10, vec![1, 2, 3], &[], TopicMatching::Exact);
        assert_matches!(
            request.validate(),
            Err(RequestError::InvalidCursorLength(3))
        );

        let request = MessagesRequest::new(5, 10, vec![0; CURSOR_LENGTH], &[], TopicMatching::Exact);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn exact_and_bloom_variants() {
        let t1 = Topic::from_bytes([10, 20, 30, 0]);
        let t2 = Topic::from_bytes([100, 120, 140, 0b111]);

        let exact = MessagesRequest::new(0, 0, Vec::new(), &[t1], TopicMatching::Exact);
        let bloom_only = MessagesRequest::new(0, 0, Vec::new(), &[t1], TopicMatching::BloomOnly);

        // Both variants carry the same bloom.
        assert_eq!(exact.bloom, topic_to_bloom(&t1));
        assert_eq!(exact.bloom, bloom_only.bloom);
        assert_eq!(exact.topics, vec![t1]);
        assert!(bloom_only.topics.is_empty());

        assert!(exact.matches(&t1));
        assert!(!exact.matches(&t2));
        assert!(bloom_only.matches(&t1));
        assert!(!bloom_only.matches(&t2));
    }
}
