// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deduplication of historic message requests for identical topic sets.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use murmur_core::{Hash, ShortFormat, Topic};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Order-independent fingerprint of a set of topics.
pub fn topics_hash(topics: &[Topic]) -> Hash {
    let mut sorted = topics.to_vec();
    sorted.sort();
    let bytes: Vec<u8> = sorted
        .iter()
        .flat_map(|topic| topic.as_bytes().to_owned())
        .collect();
    Hash::new(bytes)
}

#[derive(Debug)]
struct RequestRecord {
    last_uid: Hash,
    created_at: Instant,
}

#[derive(Debug, Default)]
struct RegistryState {
    uid_to_topics: HashMap<Hash, Hash>,
    by_topics_hash: HashMap<Hash, RequestRecord>,
}

/// Keeps track of historic message requests by the set of topics they ask for.
///
/// A request for the same topics as an earlier one is rejected until `delay` passed since that
/// earlier request got registered. Afterwards the new request replaces it. A delay of zero
/// disables deduplication.
#[derive(Debug)]
pub struct RequestsRegistry {
    delay: Duration,
    state: Mutex<RegistryState>,
}

impl RequestsRegistry {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Registers a request, failing if one for the same topics is still within the delay window.
    pub fn register(&self, uid: Hash, topics: &[Topic]) -> Result<(), RegistryError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let hash = topics_hash(topics);
        let now = Instant::now();

        if let Some(record) = state.by_topics_hash.get(&hash) {
            if now.duration_since(record.created_at) < self.delay {
                return Err(RegistryError::AlreadyInProgress(record.last_uid));
            }
        }

        debug!(
            "register request {} for topics {}",
            uid.fmt_short(),
            hash.fmt_short()
        );
        state.by_topics_hash.insert(
            hash,
            RequestRecord {
                last_uid: uid,
                created_at: now,
            },
        );
        state.uid_to_topics.insert(uid, hash);

        Ok(())
    }

    /// Returns `true` if the request is registered.
    pub fn has(&self, uid: &Hash) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.uid_to_topics.contains_key(uid)
    }

    /// Latest request registered for these topics.
    pub fn last_request(&self, topics: &[Topic]) -> Option<Hash> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .by_topics_hash
            .get(&topics_hash(topics))
            .map(|record| record.last_uid)
    }

    /// Removes a request.
    ///
    /// The topics entry is only removed when no newer request replaced this one.
    pub fn unregister(&self, uid: &Hash) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(hash) = state.uid_to_topics.remove(uid) else {
            return;
        };

        if state
            .by_topics_hash
            .get(&hash)
            .is_some_and(|record| record.last_uid == *uid)
        {
            state.by_topics_hash.remove(&hash);
        }
    }

    /// Removes all requests.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.uid_to_topics.clear();
        state.by_topics_hash.clear();
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A request for the same topics was registered within the delay window. Wait for it instead
    /// of sending another one.
    #[error("another request {0} with the same topics is already in progress")]
    AlreadyInProgress(Hash),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use murmur_core::{Hash, Topic};

    use super::{RegistryError, RequestsRegistry, topics_hash};

    const T1: Topic = Topic::from_bytes([1, 1, 1, 1]);
    const T2: Topic = Topic::from_bytes([2, 2, 2, 2]);

    fn uid(n: u8) -> Hash {
        Hash::from_bytes([n; 32])
    }

    #[test]
    fn topic_order_does_not_matter() {
        assert_eq!(topics_hash(&[T1, T2]), topics_hash(&[T2, T1]));
        assert_ne!(topics_hash(&[T1]), topics_hash(&[T2]));
    }

    #[tokio::test]
    async fn duplicate_within_window_is_rejected() {
        let registry = RequestsRegistry::new(Duration::from_secs(3));

        assert!(registry.register(uid(1), &[T1]).is_ok());
        assert_matches!(
            registry.register(uid(2), &[T1]),
            Err(RegistryError::AlreadyInProgress(id)) if id == uid(1)
        );
        assert!(!registry.has(&uid(2)));

        // Different topics don't collide.
        assert!(registry.register(uid(2), &[T2]).is_ok());
        assert!(registry.has(&uid(1)));
        assert!(registry.has(&uid(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_after_window_elapsed() {
        let registry = RequestsRegistry::new(Duration::from_secs(3));

        registry.register(uid(1), &[T1]).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.register(uid(2), &[T1]).is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry.register(uid(2), &[T1]).is_ok());
        assert_eq!(registry.last_request(&[T1]), Some(uid(2)));
    }

    #[test]
    fn zero_delay_replaces_and_keeps_successor() {
        let registry = RequestsRegistry::new(Duration::ZERO);

        assert!(registry.register(uid(1), &[T1]).is_ok());
        assert!(registry.register(uid(2), &[T1]).is_ok());

        // Removing the replaced request must not drop the record of its successor.
        registry.unregister(&uid(1));
        assert!(!registry.has(&uid(1)));
        assert_eq!(registry.last_request(&[T1]), Some(uid(2)));

        registry.unregister(&uid(2));
        assert_eq!(registry.last_request(&[T1]), None);
    }

    #[test]
    fn unregister_frees_topics() {
        let registry = RequestsRegistry::new(Duration::from_secs(60));

        registry.register(uid(1), &[T1, T2]).unwrap();
        registry.unregister(&uid(1));
        assert!(registry.register(uid(2), &[T2, T1]).is_ok());

        // Unknown ids are ignored.
        registry.unregister(&uid(9));
        assert!(registry.has(&uid(2)));
    }

    #[test]
    fn clear_removes_everything() {
        let registry = RequestsRegistry::new(Duration::from_secs(60));
        registry.register(uid(1), &[T1]).unwrap();
        registry.register(uid(2), &[T2]).unwrap();

        registry.clear();
        assert!(!registry.has(&uid(1)));
        assert!(registry.register(uid(3), &[T1]).is_ok());
    }
}
