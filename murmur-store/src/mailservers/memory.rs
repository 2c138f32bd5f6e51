// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::convert::Infallible;

use murmur_core::Mailserver;

use crate::mailservers::{MailserverRecord, MailserversStore};
use crate::memory::MemoryStore;

impl MailserversStore for MemoryStore {
    type Error = Infallible;

    async fn replace_mailservers(&self, nodes: &[Mailserver]) -> Result<(), Self::Error> {
        let mut mailservers = self.mailservers.write().await;
        let mut replacement = BTreeMap::new();
        for node in nodes {
            let last_used = mailservers
                .get(&node.id)
                .map(|record| record.last_used)
                .unwrap_or_default();
            replacement.insert(
                node.id,
                MailserverRecord {
                    id: node.id,
                    address: node.address.clone(),
                    last_used,
                },
            );
        }
        *mailservers = replacement;
        Ok(())
    }

    async fn all_mailservers(&self) -> Result<Vec<MailserverRecord>, Self::Error> {
        let mailservers = self.mailservers.read().await;
        Ok(mailservers.values().cloned().collect())
    }

    async fn update_mailserver(&self, record: MailserverRecord) -> Result<(), Self::Error> {
        let mut mailservers = self.mailservers.write().await;
        mailservers.insert(record.id, record);
        Ok(())
    }
}
