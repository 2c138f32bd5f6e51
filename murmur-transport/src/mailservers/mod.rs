// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connections to mailservers.
//!
//! The [`ConnectionManager`] keeps the node connected to a target number of mailservers and
//! replaces the ones which get dropped or stop answering requests. Known mailservers are kept in
//! a [`PeerStore`] backed by a persistent cache which also remembers when each one was last used,
//! so the most recent one can be dialed first on startup.
mod connection_manager;
mod last_used;
mod peer_store;
#[cfg(test)]
mod tests;

pub use connection_manager::{ConnectionManager, ConnectionManagerError, DEFAULT_NOTIFY_BUFFER};
pub use last_used::LastUsedConnectionMonitor;
pub use peer_store::{PeerStore, ensure_used_records_added_first};
