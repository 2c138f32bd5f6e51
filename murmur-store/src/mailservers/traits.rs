// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use murmur_core::{Mailserver, PeerId};

/// Cached mailserver with the time of its last successful use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailserverRecord {
    pub id: PeerId,
    pub address: String,

    /// Unix timestamp in seconds of the last completed request, zero if never used.
    pub last_used: u64,
}

impl MailserverRecord {
    pub fn mailserver(&self) -> Mailserver {
        Mailserver::new(self.id, self.address.clone())
    }
}

impl From<Mailserver> for MailserverRecord {
    fn from(value: Mailserver) -> Self {
        Self {
            id: value.id,
            address: value.address,
            last_used: 0,
        }
    }
}

/// Interface for caching the set of known mailservers.
pub trait MailserversStore {
    type Error: Error + Send + Sync + 'static;

    /// Replaces the cached set with the given mailservers.
    ///
    /// Records of mailservers which are part of both sets keep their `last_used` timestamp, all
    /// others are dropped.
    fn replace_mailservers(
        &self,
        nodes: &[Mailserver],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns all cached records, ordered by peer id.
    fn all_mailservers(
        &self,
    ) -> impl Future<Output = Result<Vec<MailserverRecord>, Self::Error>> + Send;

    /// Inserts or updates a single record.
    fn update_mailserver(
        &self,
        record: MailserverRecord,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
