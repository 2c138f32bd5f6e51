// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracking of mailserver requests until they completed, failed or expired.
//!
//! The network layer reports request progress as envelope events, correlated with requests by
//! their id. The monitor keeps a table of requests it knows about, finalizes them on the first
//! terminal event and hands the outcome to a handler and to the caller waiting for it.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use murmur_core::{EnvelopeEvent, EnvelopeEventType, Hash, MailServerResponse, PeerId, ShortFormat};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::RequestsRegistry;

/// How long a request without terminal event is tracked before it is dropped.
///
/// Mailservers answer or expire requests long before this, some network layers never report the
/// outcome though.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(5 * 60);

/// Callbacks for finalized mailserver requests.
///
/// Methods are invoked from the monitor's background task and should not block.
pub trait RequestEventsHandler: Send + Sync + 'static {
    fn request_completed(&self, _id: Hash, _peer: PeerId, _response: &MailServerResponse) {}

    /// The mailserver processed the request but reported an error.
    fn request_failed(&self, _id: Hash, _peer: PeerId, _error: &str) {}

    fn request_expired(&self, _id: Hash, _peer: PeerId) {}
}

impl RequestEventsHandler for () {}

/// State of a request which did not reach a terminal event yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// A local caller is about to send the request and waits for its outcome.
    Posted,

    /// The network layer sent the request to a mailserver.
    Sent,
}

/// Terminal outcome of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed(MailServerResponse),

    /// Error reported by the mailserver in its response.
    Failed(String),

    Expired,
}

#[derive(Debug)]
struct TrackedRequest {
    state: RequestState,
    since: Instant,
}

#[derive(Debug, Default)]
struct MonitorState {
    requests: HashMap<Hash, TrackedRequest>,
    waiters: HashMap<Hash, oneshot::Sender<RequestOutcome>>,
}

impl MonitorState {
    fn track(&mut self, id: Hash, state: RequestState, ttl: Duration) {
        let now = Instant::now();
        let waiters = &self.waiters;
        self.requests.retain(|id, request| {
            now.duration_since(request.since) < ttl || waiters.contains_key(id)
        });

        self.requests
            .entry(id)
            .and_modify(|request| request.state = state)
            .or_insert(TrackedRequest { state, since: now });
    }
}

/// Correlates envelope events with mailserver requests.
///
/// Cloned instances share the same request table.
#[derive(Clone)]
pub struct MailRequestMonitor {
    state: Arc<Mutex<MonitorState>>,
    registry: Arc<RequestsRegistry>,
    handler: Arc<dyn RequestEventsHandler>,
    ttl: Duration,
    shutdown_token: CancellationToken,
}

impl std::fmt::Debug for MailRequestMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailRequestMonitor")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl MailRequestMonitor {
    pub fn new(registry: Arc<RequestsRegistry>, handler: Arc<dyn RequestEventsHandler>) -> Self {
        Self {
            state: Arc::default(),
            registry,
            handler,
            ttl: DEFAULT_REQUEST_TTL,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Sets how long requests without terminal event are tracked.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Starts consuming envelope events in a background task.
    pub fn spawn(&self, events: broadcast::Receiver<EnvelopeEvent>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::task::spawn(async move { monitor.run(events).await })
    }

    async fn run(self, mut events: broadcast::Receiver<EnvelopeEvent>) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_token.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("request monitor lagged behind, {skipped} envelope events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        // Dropping the senders wakes up everyone still waiting.
        let mut state = self.lock();
        state.waiters.clear();
        debug!("request monitor stopped");
    }

    /// Stops the background task.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announces a request which is about to be sent and returns a handle to await its outcome.
    ///
    /// Dropping the waiter stops waiting, the request itself stays tracked until its terminal
    /// event arrives or it outlived the ttl of the monitor.
    pub fn watch(&self, id: Hash) -> RequestWaiter {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if !state.requests.contains_key(&id) {
            state.track(id, RequestState::Posted, self.ttl);
        }
        state.waiters.insert(id, tx);

        RequestWaiter {
            id,
            rx,
            state: self.state.clone(),
        }
    }

    /// Stops tracking a request which never made it to the network layer.
    pub fn forget(&self, id: &Hash) {
        let mut state = self.lock();
        state.requests.remove(id);
        state.waiters.remove(id);
    }

    /// Current state of a request, `None` if it is unknown or finalized.
    pub fn state(&self, id: &Hash) -> Option<RequestState> {
        self.lock().requests.get(id).map(|request| request.state)
    }

    /// Applies an envelope event to the request table.
    pub fn handle_event(&self, event: EnvelopeEvent) {
        let EnvelopeEvent { event, hash, peer } = event;

        match event {
            EnvelopeEventType::MailServerRequestSent => {
                debug!(
                    "request {} sent to mailserver {}",
                    hash.fmt_short(),
                    peer.fmt_short()
                );
                self.lock().track(hash, RequestState::Sent, self.ttl);
            }
            EnvelopeEventType::MailServerRequestCompleted(response) => {
                let outcome = match response.error {
                    Some(ref error) => RequestOutcome::Failed(error.clone()),
                    None => RequestOutcome::Completed(response),
                };
                self.finalize(hash, peer, outcome);
            }
            EnvelopeEventType::MailServerRequestExpired => {
                self.finalize(hash, peer, RequestOutcome::Expired);
            }
            EnvelopeEventType::EnvelopeSent | EnvelopeEventType::EnvelopeExpired => (),
        }
    }

    fn finalize(&self, id: Hash, peer: PeerId, outcome: RequestOutcome) {
        let waiter = {
            let mut state = self.lock();
            if state.requests.remove(&id).is_none() {
                debug!("ignore event for unknown request {}", id.fmt_short());
                return;
            }
            state.waiters.remove(&id)
        };

        // Free the topics before anybody learns about the outcome, so a follow-up request for the
        // next page isn't rejected as a duplicate.
        self.registry.unregister(&id);

        match &outcome {
            RequestOutcome::Completed(response) => {
                debug!("request {} completed", id.fmt_short());
                self.handler.request_completed(id, peer, response);
            }
            RequestOutcome::Failed(error) => {
                warn!("request {} failed: {error}", id.fmt_short());
                self.handler.request_failed(id, peer, error);
            }
            RequestOutcome::Expired => {
                debug!("request {} expired", id.fmt_short());
                self.handler.request_expired(id, peer);
            }
        }

        if let Some(waiter) = waiter {
            // Caller might have stopped waiting already.
            let _ = waiter.send(outcome);
        }
    }
}

/// Handle to await the outcome of a single request.
#[derive(Debug)]
pub struct RequestWaiter {
    id: Hash,
    rx: oneshot::Receiver<RequestOutcome>,
    state: Arc<Mutex<MonitorState>>,
}

impl RequestWaiter {
    pub fn id(&self) -> Hash {
        self.id
    }

    /// Waits for the terminal event of the request.
    ///
    /// Returns `None` when the monitor stopped before the request finished.
    pub async fn outcome(&mut self) -> Option<RequestOutcome> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for RequestWaiter {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.waiters.remove(&self.id);
    }
}
