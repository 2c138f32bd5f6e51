// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use murmur_core::{EnvelopeEvent, EnvelopeEventType, Hash, Mailserver, PeerEvent, PeerId, ShortFormat};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ConnectionManagerConfig;
use crate::monitor::DEFAULT_REQUEST_TTL;
use crate::network::Network;

/// Pending sets of mailservers handed to the connection manager.
pub const DEFAULT_NOTIFY_BUFFER: usize = 10;

/// Connection bookkeeping of the connection manager.
#[derive(Debug)]
pub(crate) struct InternalState<N> {
    network: Arc<N>,
    target: usize,
    timeout: Duration,
    pub(crate) current_nodes: HashMap<PeerId, Mailserver>,
    pub(crate) connected: HashSet<PeerId>,
}

impl<N> InternalState<N>
where
    N: Network,
{
    pub(crate) fn new(network: Arc<N>, target: usize, timeout: Duration) -> Self {
        Self {
            network,
            target,
            timeout,
            current_nodes: HashMap::new(),
            connected: HashSet::new(),
        }
    }

    fn reached_target(&self) -> bool {
        self.connected.len() >= self.target
    }

    /// Swaps the set of known mailservers.
    ///
    /// Mailservers which are not part of the new set get disconnected. All new mailservers are
    /// dialed unless enough connections exist already.
    pub(crate) fn replace_nodes(&mut self, new: HashMap<PeerId, Mailserver>) {
        for (id, node) in &self.current_nodes {
            if !new.contains_key(id) {
                self.connected.remove(id);
                self.network.remove_peer(node);
            }
        }

        if !self.reached_target() {
            for node in new.values() {
                self.network.add_peer(node);
            }
        }

        self.current_nodes = new;
    }

    pub(crate) fn node_added(&mut self, peer: PeerId) {
        let Some(node) = self.current_nodes.get(&peer) else {
            return;
        };

        if self.reached_target() {
            debug!("already connected to enough mailservers, drop {}", peer.fmt_short());
            self.network.remove_peer(node);
        } else {
            debug!("connected to mailserver {}", peer.fmt_short());
            self.connected.insert(peer);
        }
    }

    pub(crate) fn node_disconnected(&mut self, peer: PeerId) {
        // Unknown peers and peers dropped by us after we reached the target.
        if !self.current_nodes.contains_key(&peer) || !self.connected.contains(&peer) {
            return;
        }

        if self.current_nodes.len() == 1 {
            warn!("only one mailserver is known, keep {}", peer.fmt_short());
            return;
        }

        if let Some(node) = self.current_nodes.get(&peer) {
            self.network.remove_peer(node);
        }
        self.connected.remove(&peer);
        debug!("disconnected from mailserver {}", peer.fmt_short());

        if !self.reached_target() {
            for (id, node) in &self.current_nodes {
                if *id != peer {
                    self.network.add_peer(node);
                }
            }
        }
    }

    fn process_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Added(peer) => self.node_added(peer),
            PeerEvent::Dropped(peer) => self.node_disconnected(peer),
        }
    }

    /// Replaces the known mailservers and waits until enough of them connected or the timeout
    /// passed.
    pub(crate) async fn process_replacement(
        &mut self,
        nodes: Vec<Mailserver>,
        events: &mut broadcast::Receiver<PeerEvent>,
        shutdown_token: &CancellationToken,
    ) {
        let replacement = nodes.into_iter().map(|node| (node.id, node)).collect();
        self.replace_nodes(replacement);

        if self.reached_target() || self.timeout.is_zero() {
            return;
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_token.cancelled() => return,
                _ = &mut deadline => {
                    debug!("timed out waiting for mailserver connections");
                    return;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        self.process_peer_event(event);
                        if self.reached_target() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("connection manager lagged behind, {skipped} peer events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }
}

/// Request history of the connected mailservers.
#[derive(Debug, Default)]
struct FailureTracker {
    /// Requests without terminal event, with the mailserver and the time they were sent.
    requests: HashMap<Hash, (PeerId, Instant)>,
    failures: HashMap<PeerId, usize>,
}

impl FailureTracker {
    fn sent(&mut self, id: Hash, peer: PeerId) {
        let now = Instant::now();
        self.requests
            .retain(|_, (_, since)| now.duration_since(*since) < DEFAULT_REQUEST_TTL);
        self.requests.insert(id, (peer, now));
    }
}

/// Keeps the node connected to a target number of mailservers.
///
/// The manager dials from the set of mailservers it was notified about last. Peers which get
/// dropped are replaced by the others of the set and peers failing to answer requests are
/// disconnected after a number of expired requests.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    notify_tx: mpsc::Sender<Vec<Mailserver>>,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Starts the manager in a background task.
    pub fn spawn<N>(network: Arc<N>, config: ConnectionManagerConfig) -> (Self, JoinHandle<()>)
    where
        N: Network,
    {
        let (notify_tx, notify_rx) = mpsc::channel(DEFAULT_NOTIFY_BUFFER);
        let shutdown_token = CancellationToken::new();

        // Subscribe before returning so no event caused by a notification is missed.
        let peer_events = network.subscribe_peer_events();
        let envelope_events = network.subscribe_envelope_events();

        let state = InternalState::new(
            network,
            config.connections_target,
            config.timeout_wait_added,
        );
        let handle = tokio::task::spawn(run(
            state,
            config.max_failures,
            notify_rx,
            peer_events,
            envelope_events,
            shutdown_token.clone(),
        ));

        (
            Self {
                notify_tx,
                shutdown_token,
            },
            handle,
        )
    }

    #[cfg(test)]
    pub(crate) fn from_sender(notify_tx: mpsc::Sender<Vec<Mailserver>>) -> Self {
        Self {
            notify_tx,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Hands over a new set of mailservers to connect with.
    pub async fn notify(&self, nodes: Vec<Mailserver>) -> Result<(), ConnectionManagerError> {
        self.notify_tx
            .send(nodes)
            .await
            .map_err(|_| ConnectionManagerError::Stopped)
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

async fn run<N>(
    mut state: InternalState<N>,
    max_failures: usize,
    mut notify_rx: mpsc::Receiver<Vec<Mailserver>>,
    mut peer_events: broadcast::Receiver<PeerEvent>,
    mut envelope_events: broadcast::Receiver<EnvelopeEvent>,
    shutdown_token: CancellationToken,
) where
    N: Network,
{
    let mut tracker = FailureTracker::default();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_token.cancelled() => break,
            Some(nodes) = notify_rx.recv() => {
                debug!("received {} mailservers", nodes.len());
                state
                    .process_replacement(nodes, &mut peer_events, &shutdown_token)
                    .await;
            }
            event = peer_events.recv() => match event {
                Ok(event) => state.process_peer_event(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("connection manager lagged behind, {skipped} peer events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = envelope_events.recv() => match event {
                Ok(event) => process_envelope_event(&mut state, &mut tracker, max_failures, event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("connection manager lagged behind, {skipped} envelope events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    debug!("connection manager stopped");
}

fn process_envelope_event<N>(
    state: &mut InternalState<N>,
    tracker: &mut FailureTracker,
    max_failures: usize,
    event: EnvelopeEvent,
) where
    N: Network,
{
    match event.event {
        EnvelopeEventType::MailServerRequestSent => {
            tracker.sent(event.hash, event.peer);
        }
        EnvelopeEventType::MailServerRequestCompleted(_) => {
            tracker.requests.remove(&event.hash);
            tracker.failures.insert(event.peer, 0);
        }
        EnvelopeEventType::MailServerRequestExpired => {
            let Some((peer, _)) = tracker.requests.remove(&event.hash) else {
                return;
            };

            let failures = tracker.failures.entry(peer).or_default();
            *failures += 1;
            debug!(
                "request {} to mailserver {} expired, {failures} failures",
                event.hash.fmt_short(),
                peer.fmt_short()
            );

            if *failures >= max_failures {
                tracker.failures.remove(&peer);
                state.node_disconnected(peer);
            }
        }
        EnvelopeEventType::EnvelopeSent | EnvelopeEventType::EnvelopeExpired => (),
    }
}

#[derive(Debug, Error)]
pub enum ConnectionManagerError {
    #[error("connection manager stopped")]
    Stopped,

    #[error("failed to access mailserver cache: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use murmur_core::{Hash, PeerId};

    use crate::monitor::DEFAULT_REQUEST_TTL;

    use super::FailureTracker;

    #[tokio::test(start_paused = true)]
    async fn stale_requests_are_dropped() {
        let mut tracker = FailureTracker::default();
        let peer = PeerId::from_bytes([1; 32]);

        tracker.sent(Hash::from_bytes([1; 32]), peer);
        tokio::time::advance(DEFAULT_REQUEST_TTL + Duration::from_secs(1)).await;
        tracker.sent(Hash::from_bytes([2; 32]), peer);

        assert_eq!(tracker.requests.len(), 1);
        assert!(tracker.requests.contains_key(&Hash::from_bytes([2; 32])));
    }
}
