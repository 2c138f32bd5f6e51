// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable state of the murmur transport.
//!
//! Symmetric filter keys are stored by chat identifier so chats keep their keys across restarts,
//! mailserver records remember when each mailserver was last used successfully. Both concerns are
//! expressed as traits with an in-memory and a SQLite implementation.
pub mod keys;
pub mod mailservers;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use keys::KeysStore;
pub use mailservers::{MailserverRecord, MailserversStore};
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteError, SqliteStore, SqliteStoreBuilder};
