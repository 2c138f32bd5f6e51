// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use murmur_core::{
    Cursor, Hash, MessagesRequest, PeerId, PrivateKey, PublicKey, RequestError, ShortFormat,
    current_envelope_timestamp, discovery_topic, topic_for,
};
use murmur_store::KeysStore;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::filters::{Filter, FilterError, FiltersManager, NegotiatedSecret};
use crate::monitor::{MailRequestMonitor, RequestOutcome};
use crate::network::{Network, NetworkError, NewMessage, ReceivedMessage};
use crate::registry::{RegistryError, RequestsRegistry};
use crate::service::Builder;

pub(crate) struct Inner<N, S> {
    pub(crate) network: Arc<N>,
    pub(crate) filters: Arc<FiltersManager<N, S>>,
    pub(crate) registry: Arc<RequestsRegistry>,
    pub(crate) monitor: MailRequestMonitor,
    pub(crate) config: TransportConfig,
    pub(crate) private_key: PrivateKey,
    pub(crate) shutdown_token: CancellationToken,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Chats, messages and historic message requests on top of a network layer.
///
/// Every chat the node takes part in is backed by a filter on the network layer. Joining a chat
/// creates its filters, leaving removes them again. Messages are published on the topic of the
/// chat's filter and read from it.
///
/// Historic messages are requested from mailservers by the topics of all active filters. The
/// mailserver replays matching envelopes which then show up on the filters like live messages.
///
/// Cloned instances share the same state.
pub struct TransportService<N, S> {
    pub(crate) inner: Arc<Inner<N, S>>,
}

impl<N, S> Clone for TransportService<N, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N, S> TransportService<N, S>
where
    N: Network,
    S: KeysStore + Send + Sync + 'static,
{
    pub fn builder(network: Arc<N>, store: S, private_key: PrivateKey) -> Builder<N, S> {
        Builder::new(network, store, private_key)
    }

    pub fn public_key(&self) -> PublicKey {
        self.inner.private_key.public_key()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn filters_manager(&self) -> &FiltersManager<N, S> {
        &self.inner.filters
    }

    pub fn monitor(&self) -> &MailRequestMonitor {
        &self.inner.monitor
    }

    /// Creates the filters of the local identity, the given public chats and the contact codes of
    /// the given identities.
    pub async fn init_filters(
        &self,
        chat_ids: &[String],
        public_keys: &[PublicKey],
    ) -> Result<Vec<Filter>, TransportError> {
        Ok(self.inner.filters.init(chat_ids, public_keys).await?)
    }

    pub async fn filters(&self) -> Vec<Filter> {
        self.inner.filters.filters().await
    }

    pub async fn join_public(&self, chat_id: &str) -> Result<Filter, TransportError> {
        Ok(self.inner.filters.load_public(chat_id).await?)
    }

    /// Removes the filter of a public chat. Chats without a filter are ignored.
    pub async fn leave_public(&self, chat_id: &str) -> Result<(), TransportError> {
        let Some(filter) = self.inner.filters.filter_by_chat_id(chat_id).await else {
            debug!("no filter for chat {chat_id} to leave");
            return Ok(());
        };

        self.inner.filters.remove(&[filter]).await?;
        Ok(())
    }

    /// Listens for a one-to-one chat with `public_key`.
    pub async fn join_private(&self, public_key: &PublicKey) -> Result<Vec<Filter>, TransportError> {
        let mut filters = self.inner.filters.load_discovery().await?;
        filters.push(self.inner.filters.load_contact_code(public_key).await?);
        Ok(filters)
    }

    /// Removes every filter belonging to `public_key`.
    pub async fn leave_private(&self, public_key: &PublicKey) -> Result<(), TransportError> {
        let filters = self.inner.filters.filters_by_public_key(public_key).await;
        self.inner.filters.remove(&filters).await?;
        Ok(())
    }

    pub async fn join_group(&self, public_keys: &[PublicKey]) -> Result<Vec<Filter>, TransportError> {
        let mut filters = self.inner.filters.load_discovery().await?;
        for public_key in public_keys {
            filters.push(self.inner.filters.load_contact_code(public_key).await?);
        }
        Ok(filters)
    }

    pub async fn leave_group(&self, public_keys: &[PublicKey]) -> Result<(), TransportError> {
        for public_key in public_keys {
            self.leave_private(public_key).await?;
        }
        Ok(())
    }

    /// Starts listening for messages encrypted with a secret negotiated with another identity.
    pub async fn process_negotiated_secret(
        &self,
        secret: &NegotiatedSecret,
    ) -> Result<Filter, TransportError> {
        Ok(self.inner.filters.load_negotiated(secret).await?)
    }

    /// Publishes a message in a public chat, joining it first if needed.
    pub async fn send_public(
        &self,
        chat_id: &str,
        mut message: NewMessage,
    ) -> Result<Hash, TransportError> {
        let filter = self.inner.filters.load_public(chat_id).await?;

        self.sign(&mut message).await?;
        message.sym_key_id = filter.sym_key_id;
        message.public_key = None;
        message.topic = filter.topic;

        Ok(self.inner.network.post(message)?)
    }

    /// Publishes a message encrypted with a negotiated secret.
    pub async fn send_private_with_shared_secret(
        &self,
        secret: &NegotiatedSecret,
        mut message: NewMessage,
    ) -> Result<Hash, TransportError> {
        let filter = self.inner.filters.load_negotiated(secret).await?;

        self.sign(&mut message).await?;
        message.sym_key_id = filter.sym_key_id;
        message.public_key = None;
        message.topic = filter.topic;

        Ok(self.inner.network.post(message)?)
    }

    /// Publishes a message for `public_key` on their partitioned topic.
    pub async fn send_private_with_partitioned(
        &self,
        public_key: &PublicKey,
        mut message: NewMessage,
    ) -> Result<Hash, TransportError> {
        let filter = self.inner.filters.load_partitioned(public_key, false).await?;

        self.sign(&mut message).await?;
        message.sym_key_id = None;
        message.public_key = Some(*public_key);
        message.topic = filter.topic;

        Ok(self.inner.network.post(message)?)
    }

    /// Publishes a message for `public_key` on the well-known discovery topic.
    pub async fn send_private_on_discovery(
        &self,
        public_key: &PublicKey,
        mut message: NewMessage,
    ) -> Result<Hash, TransportError> {
        self.sign(&mut message).await?;
        message.sym_key_id = None;
        message.public_key = Some(*public_key);
        message.topic = topic_for(&discovery_topic());

        Ok(self.inner.network.post(message)?)
    }

    async fn sign(&self, message: &mut NewMessage) -> Result<(), FilterError> {
        message.sig_id = Some(self.inner.filters.key_pair_id().await?);
        Ok(())
    }

    /// Drains the messages of all listening filters.
    ///
    /// Messages of filters which don't listen are dropped. Filters failing to return their
    /// messages are skipped.
    pub async fn retrieve_raw_all(&self) -> Vec<(Filter, Vec<ReceivedMessage>)> {
        let mut result = Vec::new();

        for filter in self.inner.filters.filters().await {
            let messages = match self.inner.network.filter_messages(&filter.filter_id) {
                Ok(messages) => messages,
                Err(err) => {
                    warn!("retrieving messages of {} failed: {err}", filter.chat_id);
                    continue;
                }
            };

            if !filter.listen || messages.is_empty() {
                continue;
            }

            result.push((filter, messages));
        }

        result
    }

    pub async fn retrieve_public_messages(
        &self,
        chat_id: &str,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let filter = self
            .inner
            .filters
            .filter_by_chat_id(chat_id)
            .await
            .ok_or_else(|| TransportError::NoFilter(chat_id.to_string()))?;

        Ok(self.inner.network.filter_messages(&filter.filter_id)?)
    }

    /// Messages from the filters of `public_key` and the discovery filters.
    pub async fn retrieve_private_messages(
        &self,
        public_key: &PublicKey,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let mut filters = self.inner.filters.filters_by_public_key(public_key).await;
        for filter in self.inner.filters.load_discovery().await? {
            if !filters.iter().any(|known| known.chat_id == filter.chat_id) {
                filters.push(filter);
            }
        }

        let mut result = Vec::new();
        for filter in filters {
            result.extend(self.inner.network.filter_messages(&filter.filter_id)?);
        }
        Ok(result)
    }

    /// Requests one page of historic messages for the topics of all filters.
    ///
    /// Returns the cursor of the next page, which is empty when the mailserver delivered
    /// everything. The request is given up when `cancel` fires or no outcome arrived in time.
    pub async fn send_messages_request(
        &self,
        peer: &PeerId,
        from: u32,
        to: u32,
        cursor: Cursor,
        cancel: &CancellationToken,
    ) -> Result<Cursor, MailserverRequestError> {
        self.request_page(peer, from, to, cursor, self.inner.config.request_timeout, cancel)
            .await
    }

    /// Requests historic messages page by page until the mailserver delivered everything.
    ///
    /// Pages which time out or expire are requested again with a longer timeout, up to the
    /// configured number of retries.
    pub async fn request_messages(
        &self,
        peer: &PeerId,
        from: u32,
        to: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MailserverRequestError> {
        let retry = &self.inner.config.retry;
        let mut cursor = Cursor::new();

        loop {
            let mut attempt = 0;
            let next = loop {
                let timeout = retry.timeout(attempt);
                match self
                    .request_page(peer, from, to, cursor.clone(), timeout, cancel)
                    .await
                {
                    Ok(next) => break next,
                    Err(
                        err @ (MailserverRequestError::Timeout(_)
                        | MailserverRequestError::Expired(_)),
                    ) if attempt < retry.max_retries => {
                        // Nobody answers the timed out request anymore, its topics can be
                        // requested again right away.
                        if let MailserverRequestError::Timeout(id) = &err {
                            self.inner.registry.unregister(id);
                        }
                        attempt += 1;
                        warn!("{err}, retry {attempt} of {}", retry.max_retries);
                    }
                    Err(err) => return Err(err),
                }
            };

            if next.is_empty() {
                return Ok(());
            }
            cursor = next;
        }
    }

    async fn request_page(
        &self,
        peer: &PeerId,
        from: u32,
        to: u32,
        cursor: Cursor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Cursor, MailserverRequestError> {
        let config = &self.inner.config;
        let topics = self.inner.filters.topics().await;

        let mut request = MessagesRequest::new(from, to, cursor, &topics, config.topic_matching);
        request.limit = config.page_limit;
        request.timeout = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
        request.set_defaults(current_envelope_timestamp());
        request.validate()?;

        let id = request.id;
        self.inner.registry.register(id, &topics)?;
        let mut waiter = self.inner.monitor.watch(id);

        debug!(
            "request {} historic messages on {} topics from {}",
            id.fmt_short(),
            topics.len(),
            peer.fmt_short()
        );

        if let Err(err) = self.inner.network.send_messages_request(peer, request) {
            self.inner.registry.unregister(&id);
            self.inner.monitor.forget(&id);
            return Err(err.into());
        }

        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(MailserverRequestError::Cancelled),
            _ = self.inner.shutdown_token.cancelled() => return Err(MailserverRequestError::Cancelled),
            outcome = waiter.outcome() => outcome,
            _ = tokio::time::sleep(timeout) => return Err(MailserverRequestError::Timeout(id)),
        };

        match outcome {
            Some(RequestOutcome::Completed(response)) => Ok(response.cursor),
            Some(RequestOutcome::Failed(error)) => Err(MailserverRequestError::Mailserver(error)),
            Some(RequestOutcome::Expired) => Err(MailserverRequestError::Expired(id)),
            None => Err(MailserverRequestError::MonitorStopped),
        }
    }

    /// Stops all background tasks and waits for them to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown_token.cancel();
        self.inner.monitor.shutdown();

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };

        for task in tasks {
            if let Err(err) = task.await {
                warn!("transport task ended abnormally: {err}");
            }
        }

        debug!("transport service stopped");
    }
}

impl<N, S> std::fmt::Debug for TransportService<N, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportService")
            .field("public_key", &self.inner.private_key.public_key())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("no filter for chat {0}")]
    NoFilter(String),
}

#[derive(Debug, Error)]
pub enum MailserverRequestError {
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),

    #[error(transparent)]
    Duplicate(#[from] RegistryError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The mailserver processed the request but reported a failure.
    #[error("mailserver failed to process request: {0}")]
    Mailserver(String),

    /// The network layer gave up on the request.
    #[error("request {} expired", .0.fmt_short())]
    Expired(Hash),

    /// No outcome arrived before the deadline.
    #[error("request {} timed out", .0.fmt_short())]
    Timeout(Hash),

    #[error("request was cancelled")]
    Cancelled,

    #[error("request monitor stopped")]
    MonitorStopped,
}
