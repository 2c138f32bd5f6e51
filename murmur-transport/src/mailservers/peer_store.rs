// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use murmur_core::{Mailserver, PeerId};
use murmur_store::MailserversStore;
use tracing::debug;

use crate::mailservers::{ConnectionManager, ConnectionManagerError};

/// Known mailservers, mirrored into a persistent cache.
#[derive(Debug)]
pub struct PeerStore<S> {
    nodes: RwLock<HashMap<PeerId, Mailserver>>,
    store: S,
}

impl<S> PeerStore<S>
where
    S: MailserversStore,
{
    pub fn new(store: S) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn exist(&self, id: &PeerId) -> bool {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.contains_key(id)
    }

    pub fn get(&self, id: &PeerId) -> Option<Mailserver> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(id).cloned()
    }

    /// Replaces the known mailservers and the cached records.
    pub async fn update(&self, nodes: Vec<Mailserver>) -> Result<(), S::Error> {
        {
            let mut current = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            *current = nodes.iter().map(|node| (node.id, node.clone())).collect();
        }

        self.store.replace_mailservers(&nodes).await
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Connects to the most recently used mailserver before all others.
///
/// When a cached mailserver was ever used successfully, the connection manager is first notified
/// about it alone and afterwards about all cached mailservers.
pub async fn ensure_used_records_added_first<S>(
    store: &S,
    manager: &ConnectionManager,
) -> Result<(), ConnectionManagerError>
where
    S: MailserversStore,
{
    let mut records = store
        .all_mailservers()
        .await
        .map_err(|err| ConnectionManagerError::Store(Box::new(err)))?;

    if records.is_empty() {
        return Ok(());
    }

    records.sort_by(|a, b| b.last_used.cmp(&a.last_used));
    let nodes: Vec<Mailserver> = records.iter().map(|record| record.mailserver()).collect();

    if records[0].last_used > 0 {
        debug!("connect to last used mailserver {} first", records[0].id);
        manager.notify(nodes[..1].to_vec()).await?;
    }

    manager.notify(nodes).await
}
