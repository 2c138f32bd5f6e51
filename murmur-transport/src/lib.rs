// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport layer of the murmur messenger.
//!
//! Chats are mapped onto subscriptions ("filters") of an underlying pub-sub network: every chat
//! type derives its topic and its symmetric or asymmetric key in its own deterministic way, so
//! peers joining the same chat end up listening on the same topic with the same key. Derived keys
//! are persisted through a [`murmur_store::KeysStore`].
//!
//! Messages which were sent while a node was offline are replayed by mailservers. The
//! [`TransportService`] requests them page by page for the topics of all active filters,
//! deduplicates requests for the same topics with a [`RequestsRegistry`] and learns about the
//! outcome of each request through the [`MailRequestMonitor`], which consumes the events of the
//! network layer. The [`mailservers`] module keeps the node connected to a target number of
//! mailservers.
//!
//! The network layer itself is abstracted by the [`Network`] and [`KeyStore`] traits.
pub mod config;
pub mod filters;
pub mod mailservers;
pub mod monitor;
pub mod network;
pub mod registry;
pub mod service;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::{ConnectionManagerConfig, RetryConfig, TransportConfig};
pub use filters::{Filter, FilterError, FiltersManager, NegotiatedSecret};
pub use monitor::{MailRequestMonitor, RequestEventsHandler, RequestOutcome, RequestState};
pub use network::{KeyStore, Network, NetworkError, NewMessage, ReceivedMessage, SubscribeOptions};
pub use registry::{RegistryError, RequestsRegistry};
pub use service::{MailserverRequestError, TransportError, TransportService};
