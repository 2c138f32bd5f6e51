// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces of the pub-sub network layer this crate builds on.
//!
//! The network layer routes envelopes by topic, holds key material referenced by opaque ids and
//! forwards requests to mailservers. Everything here is an in-process call into that layer, the
//! outcome of mailserver requests arrives later as [`EnvelopeEvent`]s.
use murmur_core::{
    EnvelopeEvent, Hash, Mailserver, MessagesRequest, PeerEvent, PeerId, PrivateKey, PublicKey,
    SymmetricKey, Topic,
};
use thiserror::Error;
use tokio::sync::broadcast;

/// Suggested capacity of the event channels of network implementations.
///
/// Consumers process events in background tasks, the buffer absorbs bursts while they are busy.
pub const DEFAULT_EVENTS_BUFFER: usize = 100;

/// Proof-of-work threshold high enough that no envelope ever passes it.
///
/// Filters subscribed with it are only used to publish.
pub const MAX_POW: f64 = 1.0;

/// Proof-of-work threshold accepting every envelope.
pub const MIN_POW: f64 = 0.0;

/// Key material held by the network layer.
pub trait KeyStore: Send + Sync + 'static {
    /// Stores a key pair, returns its id.
    fn add_key_pair(&self, private_key: &PrivateKey) -> Result<String, NetworkError>;

    fn get_private_key(&self, id: &str) -> Result<PrivateKey, NetworkError>;

    /// Returns `true` if a key pair with this id existed.
    fn delete_key_pair(&self, id: &str) -> bool;

    /// Stores a symmetric key, returns its id.
    fn add_sym_key_direct(&self, key: &SymmetricKey) -> Result<String, NetworkError>;

    /// Derives a symmetric key deterministically from a password and stores it, returns its id.
    fn add_sym_key_from_password(&self, password: &str) -> Result<String, NetworkError>;

    fn get_sym_key(&self, id: &str) -> Result<SymmetricKey, NetworkError>;

    /// Returns `true` if a symmetric key with this id existed.
    fn delete_sym_key(&self, id: &str) -> bool;
}

/// Subscription, publishing and mailserver interface of the network layer.
pub trait Network: KeyStore {
    /// Installs a subscription for the given topics, returns the filter id.
    fn subscribe(&self, options: SubscribeOptions) -> Result<String, NetworkError>;

    fn unsubscribe(&self, filter_id: &str) -> Result<(), NetworkError>;

    /// Drains the messages received on a subscription since the last call.
    fn filter_messages(&self, filter_id: &str) -> Result<Vec<ReceivedMessage>, NetworkError>;

    /// Publishes a message, returns the envelope hash.
    fn post(&self, message: NewMessage) -> Result<Hash, NetworkError>;

    /// Sends a historic message request to a mailserver.
    ///
    /// The network layer reports progress with mailserver events carrying the request id.
    fn send_messages_request(
        &self,
        peer: &PeerId,
        request: MessagesRequest,
    ) -> Result<(), NetworkError>;

    fn subscribe_envelope_events(&self) -> broadcast::Receiver<EnvelopeEvent>;

    /// Connects to a peer, success is reported with a [`PeerEvent::Added`].
    fn add_peer(&self, node: &Mailserver);

    /// Disconnects from a peer, reported with a [`PeerEvent::Dropped`].
    fn remove_peer(&self, node: &Mailserver);

    fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent>;
}

/// Parameters of a subscription.
///
/// Exactly one of `sym_key_id` and `private_key_id` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscribeOptions {
    pub sym_key_id: Option<String>,
    pub private_key_id: Option<String>,

    /// Minimum proof-of-work of accepted envelopes.
    pub min_pow: f64,

    pub topics: Vec<Topic>,
}

/// Message to publish.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewMessage {
    /// Symmetric key to encrypt with.
    pub sym_key_id: Option<String>,

    /// Recipient key for asymmetric encryption.
    pub public_key: Option<PublicKey>,

    /// Key pair to sign with.
    pub sig_id: Option<String>,

    pub topic: Topic,
    pub payload: Vec<u8>,

    /// Time-to-live in seconds.
    pub ttl: u32,

    pub pow_target: f64,

    /// Maximum seconds to spend on proof-of-work.
    pub pow_time: u32,
}

impl NewMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }
}

/// Message decrypted by a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Envelope hash.
    pub hash: Hash,

    pub topic: Topic,
    pub payload: Vec<u8>,

    /// Public key of the signer, if the message was signed.
    pub sig: Option<PublicKey>,

    /// Send timestamp in unix seconds.
    pub timestamp: u32,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no subscription with id {0}")]
    UnknownFilter(String),

    #[error("no key with id {0}")]
    UnknownKey(String),

    #[error("invalid subscription options: {0}")]
    InvalidOptions(String),

    #[error("peer {0} is not connected")]
    PeerNotConnected(PeerId),

    /// Failure reported by the network layer implementation.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
