// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::error::Error;

use murmur_core::SymmetricKey;

/// Durable mapping from chat identifiers to the symmetric keys generated for them.
///
/// Keys are loaded once when the filters are set up and written whenever a new key got derived,
/// this way chats keep their keys across restarts.
pub trait KeysStore {
    type Error: Error + Send + Sync + 'static;

    /// Returns every persisted key by chat identifier.
    fn all_keys(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, SymmetricKey>, Self::Error>> + Send;

    /// Persists the key for a chat.
    ///
    /// Existing entries are never overwritten. Returns `true` if the key got inserted and `false`
    /// if the chat already had one.
    fn add_key(
        &self,
        chat_id: &str,
        key: &SymmetricKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
