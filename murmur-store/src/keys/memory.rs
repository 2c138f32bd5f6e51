// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::convert::Infallible;

use murmur_core::SymmetricKey;

use crate::keys::KeysStore;
use crate::memory::MemoryStore;

impl KeysStore for MemoryStore {
    type Error = Infallible;

    async fn all_keys(&self) -> Result<HashMap<String, SymmetricKey>, Self::Error> {
        let keys = self.keys.read().await;
        Ok(keys
            .iter()
            .map(|(chat_id, key)| (chat_id.clone(), *key))
            .collect())
    }

    async fn add_key(&self, chat_id: &str, key: &SymmetricKey) -> Result<bool, Self::Error> {
        let mut keys = self.keys.write().await;
        if keys.contains_key(chat_id) {
            return Ok(false);
        }
        keys.insert(chat_id.to_string(), *key);
        Ok(true)
    }
}
