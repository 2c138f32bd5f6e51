// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory network layer for tests.
//!
//! Every [`MemoryNetwork`] is one node. Nodes created from the same [`MemoryHub`] receive each
//! other's messages, the hub also keeps an archive of every envelope which nodes can query like a
//! mailserver.
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use murmur_core::request::CURSOR_LENGTH;
use murmur_core::{
    EnvelopeEvent, EnvelopeEventType, Hash, MailServerResponse, Mailserver, MessagesRequest,
    PeerEvent, PeerId, PrivateKey, PublicKey, SymmetricKey, Topic, current_envelope_timestamp,
};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::network::{
    DEFAULT_EVENTS_BUFFER, KeyStore, MAX_POW, Network, NetworkError, NewMessage, ReceivedMessage,
    SubscribeOptions,
};

/// Enables log output when `RUST_LOG` is set.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug)]
struct Envelope {
    hash: Hash,
    topic: Topic,
    payload: Vec<u8>,
    sym_key: Option<SymmetricKey>,
    recipient: Option<PublicKey>,
    sig: Option<PublicKey>,
    pow: f64,
    timestamp: u32,
}

impl Envelope {
    fn cursor(&self) -> Vec<u8> {
        let mut cursor = Vec::with_capacity(CURSOR_LENGTH);
        cursor.extend_from_slice(self.hash.as_bytes());
        cursor.extend_from_slice(&self.timestamp.to_be_bytes());
        cursor
    }

    fn message(&self) -> ReceivedMessage {
        ReceivedMessage {
            hash: self.hash,
            topic: self.topic,
            payload: self.payload.clone(),
            sig: self.sig,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug)]
enum SubscriptionKey {
    Symmetric(SymmetricKey),
    Asymmetric(PrivateKey),
}

#[derive(Debug)]
struct Subscription {
    options: SubscribeOptions,
    key: SubscriptionKey,
    messages: Vec<ReceivedMessage>,
}

impl Subscription {
    fn accepts(&self, envelope: &Envelope) -> bool {
        if !self.options.topics.contains(&envelope.topic) {
            return false;
        }

        if self.options.min_pow >= MAX_POW || envelope.pow < self.options.min_pow {
            return false;
        }

        match &self.key {
            SubscriptionKey::Symmetric(key) => envelope.sym_key.as_ref() == Some(key),
            SubscriptionKey::Asymmetric(private_key) => {
                envelope.recipient == Some(private_key.public_key())
            }
        }
    }
}

/// How the simulated mailservers answer historic message requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MailserverMode {
    /// Deliver a page of archived envelopes and complete the request.
    #[default]
    Respond,

    /// Complete every request with this error.
    Fail(String),

    /// Report every request as expired.
    Expire,

    /// Only confirm that the request was sent.
    Silent,
}

#[derive(Debug, Default)]
struct NodeState {
    next_id: u64,
    key_pairs: HashMap<String, PrivateKey>,
    sym_keys: HashMap<String, SymmetricKey>,
    subscriptions: HashMap<String, Subscription>,
    failing_unsubscribe: BTreeSet<String>,
    peers: BTreeSet<PeerId>,
    requests: Vec<(PeerId, MessagesRequest)>,
    mailserver_mode: MailserverMode,
}

impl NodeState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:032x}", self.next_id)
    }

    fn deliver(&mut self, envelope: &Envelope) {
        for subscription in self.subscriptions.values_mut() {
            if subscription.accepts(envelope) {
                subscription.messages.push(envelope.message());
            }
        }
    }
}

#[derive(Debug, Default)]
struct HubState {
    nodes: Vec<Arc<Mutex<NodeState>>>,
    archive: Vec<Envelope>,
    envelopes_count: u64,
}

/// Shared medium connecting in-memory nodes.
#[derive(Clone, Debug, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node connected to this hub.
    pub fn network(&self) -> MemoryNetwork {
        let node = Arc::new(Mutex::new(NodeState::default()));
        lock(&self.state).nodes.push(node.clone());

        let (envelope_events, _) = broadcast::channel(DEFAULT_EVENTS_BUFFER);
        let (peer_events, _) = broadcast::channel(DEFAULT_EVENTS_BUFFER);

        MemoryNetwork {
            node,
            hub: self.clone(),
            envelope_events,
            peer_events,
        }
    }

    /// Number of envelopes posted by all nodes.
    pub fn archived(&self) -> usize {
        lock(&self.state).archive.len()
    }
}

/// Single node of an in-memory network.
#[derive(Debug)]
pub struct MemoryNetwork {
    node: Arc<Mutex<NodeState>>,
    hub: MemoryHub,
    envelope_events: broadcast::Sender<EnvelopeEvent>,
    peer_events: broadcast::Sender<PeerEvent>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Creates a node on its own hub.
    pub fn new() -> Self {
        MemoryHub::new().network()
    }

    pub fn set_mailserver_mode(&self, mode: MailserverMode) {
        lock(&self.node).mailserver_mode = mode;
    }

    /// Makes unsubscribing the given filter fail.
    pub fn fail_unsubscribe(&self, filter_id: &str) {
        lock(&self.node)
            .failing_unsubscribe
            .insert(filter_id.to_string());
    }

    pub fn subscription(&self, filter_id: &str) -> Option<SubscribeOptions> {
        lock(&self.node)
            .subscriptions
            .get(filter_id)
            .map(|subscription| subscription.options.clone())
    }

    pub fn subscriptions_count(&self) -> usize {
        lock(&self.node).subscriptions.len()
    }

    pub fn key_pairs_count(&self) -> usize {
        lock(&self.node).key_pairs.len()
    }

    pub fn sym_keys_count(&self) -> usize {
        lock(&self.node).sym_keys.len()
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        lock(&self.node).peers.iter().copied().collect()
    }

    /// Mailserver requests sent by this node.
    pub fn requests(&self) -> Vec<(PeerId, MessagesRequest)> {
        lock(&self.node).requests.clone()
    }

    pub fn emit_envelope_event(&self, event: EnvelopeEvent) {
        let _ = self.envelope_events.send(event);
    }

    pub fn emit_peer_event(&self, event: PeerEvent) {
        let _ = self.peer_events.send(event);
    }

    /// Archived envelopes matching the request, after its cursor and limited to one page.
    fn query_archive(&self, request: &MessagesRequest) -> (Vec<Envelope>, bool) {
        let hub = lock(&self.hub.state);
        let mut matching: Vec<&Envelope> = hub
            .archive
            .iter()
            .filter(|envelope| {
                envelope.timestamp >= request.from
                    && envelope.timestamp <= request.to
                    && request.matches(&envelope.topic)
            })
            .collect();
        matching.sort_by_key(|envelope| (envelope.timestamp, envelope.hash));

        let start = if request.cursor.is_empty() {
            0
        } else {
            matching
                .iter()
                .position(|envelope| envelope.cursor() == request.cursor)
                .map_or(0, |position| position + 1)
        };

        let remaining = &matching[start..];
        let limit = request.limit as usize;
        let page: Vec<Envelope> = remaining.iter().take(limit).map(|e| (*e).clone()).collect();
        (page, remaining.len() > limit)
    }

    fn respond(&self, peer: PeerId, request: &MessagesRequest, mode: MailserverMode) {
        let event = match mode {
            MailserverMode::Respond => {
                let (page, has_more) = self.query_archive(request);
                {
                    let mut node = lock(&self.node);
                    for envelope in &page {
                        node.deliver(envelope);
                    }
                }

                let last = page.last();
                EnvelopeEventType::MailServerRequestCompleted(MailServerResponse {
                    last_envelope_hash: last.map(|envelope| envelope.hash).unwrap_or_default(),
                    cursor: match last {
                        Some(envelope) if has_more => envelope.cursor(),
                        _ => Vec::new(),
                    },
                    error: None,
                })
            }
            MailserverMode::Fail(error) => {
                EnvelopeEventType::MailServerRequestCompleted(MailServerResponse {
                    error: Some(error),
                    ..Default::default()
                })
            }
            MailserverMode::Expire => EnvelopeEventType::MailServerRequestExpired,
            MailserverMode::Silent => return,
        };

        self.emit_envelope_event(EnvelopeEvent::new(event, request.id, peer));
    }
}

impl KeyStore for MemoryNetwork {
    fn add_key_pair(&self, private_key: &PrivateKey) -> Result<String, NetworkError> {
        let mut node = lock(&self.node);
        let id = node.next_id();
        node.key_pairs.insert(id.clone(), private_key.clone());
        Ok(id)
    }

    fn get_private_key(&self, id: &str) -> Result<PrivateKey, NetworkError> {
        lock(&self.node)
            .key_pairs
            .get(id)
            .cloned()
            .ok_or_else(|| NetworkError::UnknownKey(id.to_string()))
    }

    fn delete_key_pair(&self, id: &str) -> bool {
        lock(&self.node).key_pairs.remove(id).is_some()
    }

    fn add_sym_key_direct(&self, key: &SymmetricKey) -> Result<String, NetworkError> {
        let mut node = lock(&self.node);
        let id = node.next_id();
        node.sym_keys.insert(id.clone(), *key);
        Ok(id)
    }

    fn add_sym_key_from_password(&self, password: &str) -> Result<String, NetworkError> {
        let key = SymmetricKey::from_password(password);
        self.add_sym_key_direct(&key)
    }

    fn get_sym_key(&self, id: &str) -> Result<SymmetricKey, NetworkError> {
        lock(&self.node)
            .sym_keys
            .get(id)
            .copied()
            .ok_or_else(|| NetworkError::UnknownKey(id.to_string()))
    }

    fn delete_sym_key(&self, id: &str) -> bool {
        lock(&self.node).sym_keys.remove(id).is_some()
    }
}

impl Network for MemoryNetwork {
    fn subscribe(&self, options: SubscribeOptions) -> Result<String, NetworkError> {
        let mut node = lock(&self.node);

        let key = match (&options.sym_key_id, &options.private_key_id) {
            (Some(id), None) => SubscriptionKey::Symmetric(
                *node
                    .sym_keys
                    .get(id)
                    .ok_or_else(|| NetworkError::UnknownKey(id.clone()))?,
            ),
            (None, Some(id)) => SubscriptionKey::Asymmetric(
                node.key_pairs
                    .get(id)
                    .cloned()
                    .ok_or_else(|| NetworkError::UnknownKey(id.clone()))?,
            ),
            _ => {
                return Err(NetworkError::InvalidOptions(
                    "exactly one of symmetric or private key required".into(),
                ));
            }
        };

        if options.topics.is_empty() {
            return Err(NetworkError::InvalidOptions("no topics given".into()));
        }

        let id = node.next_id();
        node.subscriptions.insert(
            id.clone(),
            Subscription {
                options,
                key,
                messages: Vec::new(),
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, filter_id: &str) -> Result<(), NetworkError> {
        let mut node = lock(&self.node);
        if node.failing_unsubscribe.contains(filter_id) {
            return Err(NetworkError::Other("unsubscribe failed".into()));
        }

        node.subscriptions
            .remove(filter_id)
            .map(|_| ())
            .ok_or_else(|| NetworkError::UnknownFilter(filter_id.to_string()))
    }

    fn filter_messages(&self, filter_id: &str) -> Result<Vec<ReceivedMessage>, NetworkError> {
        let mut node = lock(&self.node);
        node.subscriptions
            .get_mut(filter_id)
            .map(|subscription| std::mem::take(&mut subscription.messages))
            .ok_or_else(|| NetworkError::UnknownFilter(filter_id.to_string()))
    }

    fn post(&self, message: NewMessage) -> Result<Hash, NetworkError> {
        let (sym_key, sig) = {
            let node = lock(&self.node);

            let sym_key = match (&message.sym_key_id, &message.public_key) {
                (Some(id), None) => Some(
                    *node
                        .sym_keys
                        .get(id)
                        .ok_or_else(|| NetworkError::UnknownKey(id.clone()))?,
                ),
                (None, Some(_)) => None,
                _ => {
                    return Err(NetworkError::InvalidOptions(
                        "exactly one of symmetric key or recipient required".into(),
                    ));
                }
            };

            let sig = match &message.sig_id {
                Some(id) => Some(
                    node.key_pairs
                        .get(id)
                        .map(PrivateKey::public_key)
                        .ok_or_else(|| NetworkError::UnknownKey(id.clone()))?,
                ),
                None => None,
            };

            (sym_key, sig)
        };

        let (envelope, nodes) = {
            let mut hub = lock(&self.hub.state);
            hub.envelopes_count += 1;

            let timestamp = current_envelope_timestamp();
            let mut preimage = message.topic.as_bytes().to_vec();
            preimage.extend_from_slice(&message.payload);
            preimage.extend_from_slice(&timestamp.to_be_bytes());
            preimage.extend_from_slice(&hub.envelopes_count.to_be_bytes());

            let envelope = Envelope {
                hash: Hash::new(preimage),
                topic: message.topic,
                payload: message.payload,
                sym_key,
                recipient: message.public_key,
                sig,
                pow: message.pow_target,
                timestamp,
            };
            hub.archive.push(envelope.clone());
            (envelope, hub.nodes.clone())
        };

        for node in nodes {
            lock(&node).deliver(&envelope);
        }

        self.emit_envelope_event(EnvelopeEvent::new(
            EnvelopeEventType::EnvelopeSent,
            envelope.hash,
            PeerId::default(),
        ));

        Ok(envelope.hash)
    }

    fn send_messages_request(
        &self,
        peer: &PeerId,
        request: MessagesRequest,
    ) -> Result<(), NetworkError> {
        let mode = {
            let mut node = lock(&self.node);
            if !node.peers.contains(peer) {
                return Err(NetworkError::PeerNotConnected(*peer));
            }
            node.requests.push((*peer, request.clone()));
            node.mailserver_mode.clone()
        };

        self.emit_envelope_event(EnvelopeEvent::new(
            EnvelopeEventType::MailServerRequestSent,
            request.id,
            *peer,
        ));
        self.respond(*peer, &request, mode);

        Ok(())
    }

    fn subscribe_envelope_events(&self) -> broadcast::Receiver<EnvelopeEvent> {
        self.envelope_events.subscribe()
    }

    fn add_peer(&self, node: &Mailserver) {
        lock(&self.node).peers.insert(node.id);
        self.emit_peer_event(PeerEvent::Added(node.id));
    }

    fn remove_peer(&self, node: &Mailserver) {
        lock(&self.node).peers.remove(&node.id);
        self.emit_peer_event(PeerEvent::Dropped(node.id));
    }

    fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.peer_events.subscribe()
    }
}
