// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use murmur_core::{PeerId, SymmetricKey};
use tokio::sync::RwLock;

use crate::mailservers::MailserverRecord;

/// In-memory store.
///
/// This does not persist data permanently, all changes are lost when the process ends. Use this
/// only in development or test contexts.
///
/// Cloned instances share the same state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    pub(crate) keys: Arc<RwLock<BTreeMap<String, SymmetricKey>>>,
    pub(crate) mailservers: Arc<RwLock<BTreeMap<PeerId, MailserverRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// Trait implementations are in the regarding modules, see `keys` and `mailservers`.
