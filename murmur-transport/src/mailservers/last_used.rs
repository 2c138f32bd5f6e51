// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use murmur_core::{EnvelopeEvent, EnvelopeEventType, ShortFormat, current_timestamp};
use murmur_store::{MailserverRecord, MailserversStore};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::mailservers::PeerStore;

/// Records when each known mailserver last completed a request.
#[derive(Clone, Debug)]
pub struct LastUsedConnectionMonitor {
    shutdown_token: CancellationToken,
}

impl LastUsedConnectionMonitor {
    pub fn spawn<S>(
        peer_store: Arc<PeerStore<S>>,
        events: broadcast::Receiver<EnvelopeEvent>,
    ) -> (Self, JoinHandle<()>)
    where
        S: MailserversStore + Send + Sync + 'static,
    {
        let shutdown_token = CancellationToken::new();
        let handle = tokio::task::spawn(run(peer_store, events, shutdown_token.clone()));
        (Self { shutdown_token }, handle)
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

async fn run<S>(
    peer_store: Arc<PeerStore<S>>,
    mut events: broadcast::Receiver<EnvelopeEvent>,
    shutdown_token: CancellationToken,
) where
    S: MailserversStore + Send + Sync + 'static,
{
    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown_token.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("last used monitor lagged behind, {skipped} envelope events were dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if !matches!(event.event, EnvelopeEventType::MailServerRequestCompleted(_)) {
            continue;
        }

        let Some(node) = peer_store.get(&event.peer) else {
            continue;
        };

        let mut record = MailserverRecord::from(node);
        record.last_used = current_timestamp();

        match peer_store.store().update_mailserver(record).await {
            Ok(()) => debug!("mailserver {} used", event.peer.fmt_short()),
            Err(err) => error!("updating mailserver record failed: {err:?}"),
        }
    }
}
