// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use murmur_core::{
    PrivateKey, PublicKey, ShortFormat, SymmetricKey, Topic, contact_code_topic, discovery_topic,
    negotiated_topic, partitioned_topic, personal_discovery_topic, topic_for,
};
use murmur_store::KeysStore;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::filters::{Filter, NegotiatedSecret, RawFilter};
use crate::network::{MAX_POW, MIN_POW, Network, NetworkError, SubscribeOptions};

#[derive(Debug, Default)]
struct FiltersState {
    filters: BTreeMap<String, Filter>,

    /// Symmetric keys by the password they were derived from.
    keys: HashMap<String, SymmetricKey>,

    /// Id of the local key pair on the network layer.
    key_pair_id: Option<String>,
}

/// Creates, tracks and removes the subscriptions of all chats.
///
/// Every chat has at most one filter. Loading a chat a second time returns the existing filter.
/// Symmetric keys derived for chats are persisted, so a chat keeps its key after a restart even if
/// the derivation on the network layer changes.
pub struct FiltersManager<N, S> {
    network: Arc<N>,
    store: S,
    private_key: PrivateKey,
    generic_discovery_topic_enabled: bool,
    state: Mutex<FiltersState>,
}

impl<N, S> FiltersManager<N, S>
where
    N: Network,
    S: KeysStore,
{
    /// Creates a manager for the local identity and loads all persisted keys.
    pub async fn new(
        network: Arc<N>,
        store: S,
        private_key: PrivateKey,
        generic_discovery_topic_enabled: bool,
    ) -> Result<Self, FilterError> {
        let keys = store.all_keys().await.map_err(FilterError::store)?;
        debug!("loaded {} persisted filter keys", keys.len());

        Ok(Self {
            network,
            store,
            private_key,
            generic_discovery_topic_enabled,
            state: Mutex::new(FiltersState {
                filters: BTreeMap::new(),
                keys,
                key_pair_id: None,
            }),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// Loads the filters of the local identity, the given public chats and the contact codes of
    /// the given identities. Returns all active filters.
    pub async fn init(
        &self,
        chat_ids: &[String],
        public_keys: &[PublicKey],
    ) -> Result<Vec<Filter>, FilterError> {
        let public_key = self.public_key();

        self.load_contact_code(&public_key).await?;
        self.load_partitioned(&public_key, true).await?;
        self.load_discovery().await?;

        for chat_id in chat_ids {
            self.load_public(chat_id).await?;
        }

        for public_key in public_keys {
            self.load_contact_code(public_key).await?;
        }

        Ok(self.filters().await)
    }

    /// Filter of a public chat, encrypted with a key derived from the chat id.
    pub async fn load_public(&self, chat_id: &str) -> Result<Filter, FilterError> {
        let mut state = self.state.lock().await;
        if let Some(filter) = state.filters.get(chat_id) {
            return Ok(filter.clone());
        }

        let raw = self.add_symmetric(&mut state, chat_id).await?;
        let filter = Filter::new(chat_id, raw);
        Ok(Self::insert(&mut state, filter, "public"))
    }

    /// Filter on the partition of `public_key`, decrypted with the local identity.
    ///
    /// With `listen` set to `false` the filter only serves to publish on the partition, no message
    /// passes its proof-of-work threshold.
    pub async fn load_partitioned(
        &self,
        public_key: &PublicKey,
        listen: bool,
    ) -> Result<Filter, FilterError> {
        let chat_id = partitioned_topic(public_key);

        let mut state = self.state.lock().await;
        if let Some(filter) = state.filters.get(&chat_id) {
            return Ok(filter.clone());
        }

        let raw = self.add_asymmetric(&mut state, &chat_id, listen)?;
        let filter = Filter::new(chat_id, raw)
            .identity(public_key)
            .one_to_one()
            .listen(listen);
        Ok(Self::insert(&mut state, filter, "partitioned"))
    }

    /// Filters on the discovery topics of the local identity.
    ///
    /// This is always the personal discovery topic, plus the well-known discovery topic when it is
    /// enabled.
    pub async fn load_discovery(&self) -> Result<Vec<Filter>, FilterError> {
        let public_key = self.public_key();

        let mut chat_ids = vec![personal_discovery_topic(&public_key)];
        if self.generic_discovery_topic_enabled {
            chat_ids.push(discovery_topic());
        }

        let mut state = self.state.lock().await;
        let mut result = Vec::with_capacity(chat_ids.len());

        for chat_id in chat_ids {
            if let Some(filter) = state.filters.get(&chat_id) {
                result.push(filter.clone());
                continue;
            }

            let raw = self.add_asymmetric(&mut state, &chat_id, true)?;
            let filter = Filter::new(chat_id, raw)
                .identity(&public_key)
                .one_to_one()
                .discovery();
            result.push(Self::insert(&mut state, filter, "discovery"));
        }

        Ok(result)
    }

    /// Filter for messages encrypted with a secret negotiated with another identity.
    pub async fn load_negotiated(&self, secret: &NegotiatedSecret) -> Result<Filter, FilterError> {
        let chat_id = negotiated_topic(&secret.public_key);

        let mut state = self.state.lock().await;
        if let Some(filter) = state.filters.get(&chat_id) {
            return Ok(filter.clone());
        }

        let raw = self
            .add_symmetric(&mut state, &hex::encode(&secret.key))
            .await?;
        let filter = Filter::new(chat_id, raw)
            .identity(&secret.public_key)
            .one_to_one()
            .negotiated();
        Ok(Self::insert(&mut state, filter, "negotiated"))
    }

    /// Filter on the topic where `public_key` advertises their contact code.
    pub async fn load_contact_code(&self, public_key: &PublicKey) -> Result<Filter, FilterError> {
        let chat_id = contact_code_topic(public_key);

        let mut state = self.state.lock().await;
        if let Some(filter) = state.filters.get(&chat_id) {
            return Ok(filter.clone());
        }

        let raw = self.add_symmetric(&mut state, &chat_id).await?;
        let filter = Filter::new(chat_id, raw).identity(public_key);
        Ok(Self::insert(&mut state, filter, "contact-code"))
    }

    /// Removes the given filters from the network layer and the manager.
    ///
    /// Stops at the first filter which can't be unsubscribed, filters removed before stay removed.
    pub async fn remove(&self, filters: &[Filter]) -> Result<(), FilterError> {
        let mut state = self.state.lock().await;
        for filter in filters {
            self.remove_filter(&mut state, filter)?;
        }
        Ok(())
    }

    /// Removes all filters which only exist to publish.
    pub async fn remove_no_listen_filters(&self) -> Result<(), FilterError> {
        let mut state = self.state.lock().await;
        let filters: Vec<Filter> = state
            .filters
            .values()
            .filter(|filter| !filter.listen)
            .cloned()
            .collect();

        for filter in &filters {
            self.remove_filter(&mut state, filter)?;
        }
        Ok(())
    }

    /// Removes every active filter.
    pub async fn reset(&self) -> Result<(), FilterError> {
        let mut state = self.state.lock().await;
        let filters: Vec<Filter> = state.filters.values().cloned().collect();

        for filter in &filters {
            self.remove_filter(&mut state, filter)?;
        }
        Ok(())
    }

    /// Id of the local identity's key pair on the network layer.
    ///
    /// The key pair is added on first use and shared by signing and all asymmetric filters.
    pub async fn key_pair_id(&self) -> Result<String, FilterError> {
        let mut state = self.state.lock().await;
        self.add_key_pair(&mut state)
    }

    pub async fn filters(&self) -> Vec<Filter> {
        let state = self.state.lock().await;
        state.filters.values().cloned().collect()
    }

    /// Topics of all active filters.
    pub async fn topics(&self) -> Vec<Topic> {
        let state = self.state.lock().await;
        let mut topics: Vec<Topic> = state.filters.values().map(|filter| filter.topic).collect();
        topics.sort();
        topics.dedup();
        topics
    }

    pub async fn filter_by_chat_id(&self, chat_id: &str) -> Option<Filter> {
        let state = self.state.lock().await;
        state.filters.get(chat_id).cloned()
    }

    pub async fn filter_by_filter_id(&self, filter_id: &str) -> Option<Filter> {
        let state = self.state.lock().await;
        state
            .filters
            .values()
            .find(|filter| filter.filter_id == filter_id)
            .cloned()
    }

    pub async fn filter_by_topic(&self, topic: &Topic) -> Option<Filter> {
        let state = self.state.lock().await;
        state
            .filters
            .values()
            .find(|filter| filter.topic == *topic)
            .cloned()
    }

    /// All filters belonging to an identity.
    pub async fn filters_by_public_key(&self, public_key: &PublicKey) -> Vec<Filter> {
        let state = self.state.lock().await;
        state
            .filters
            .values()
            .filter(|filter| filter.is_identity(public_key))
            .cloned()
            .collect()
    }

    pub async fn negotiated_filter(&self, public_key: &PublicKey) -> Option<Filter> {
        self.filter_by_chat_id(&negotiated_topic(public_key)).await
    }

    fn insert(state: &mut FiltersState, filter: Filter, kind: &str) -> Filter {
        debug!(
            "registered {kind} filter for {} on topic {}",
            filter.chat_id, filter.topic
        );
        state.filters.insert(filter.chat_id.clone(), filter.clone());
        filter
    }

    fn remove_filter(&self, state: &mut FiltersState, filter: &Filter) -> Result<(), FilterError> {
        self.network.unsubscribe(&filter.filter_id)?;
        if let Some(sym_key_id) = &filter.sym_key_id {
            self.network.delete_sym_key(sym_key_id);
        }
        state.filters.remove(&filter.chat_id);
        debug!("removed filter for {}", filter.chat_id);
        Ok(())
    }

    /// Subscribes to the topic of `password` with a symmetric key derived from it.
    ///
    /// A key derived earlier is reused from the cache, otherwise the network layer derives it and
    /// the result is persisted before subscribing.
    async fn add_symmetric(
        &self,
        state: &mut FiltersState,
        password: &str,
    ) -> Result<RawFilter, FilterError> {
        let topic = topic_for(password);

        let sym_key_id = match state.keys.get(password) {
            Some(key) => self.network.add_sym_key_direct(key)?,
            None => {
                let sym_key_id = self.network.add_sym_key_from_password(password)?;
                let key = self.network.get_sym_key(&sym_key_id)?;
                state.keys.insert(password.to_string(), key);
                self.store
                    .add_key(password, &key)
                    .await
                    .map_err(FilterError::store)?;
                debug!("derived new key for topic {topic}");
                sym_key_id
            }
        };

        let filter_id = self.network.subscribe(SubscribeOptions {
            sym_key_id: Some(sym_key_id.clone()),
            private_key_id: None,
            min_pow: MIN_POW,
            topics: vec![topic],
        })?;

        Ok(RawFilter {
            filter_id,
            topic,
            sym_key_id: Some(sym_key_id),
        })
    }

    fn add_key_pair(&self, state: &mut FiltersState) -> Result<String, FilterError> {
        if let Some(id) = &state.key_pair_id {
            return Ok(id.clone());
        }

        let id = self.network.add_key_pair(&self.private_key)?;
        state.key_pair_id = Some(id.clone());
        Ok(id)
    }

    /// Subscribes to the topic of `chat_id` with the key pair of the local identity.
    fn add_asymmetric(
        &self,
        state: &mut FiltersState,
        chat_id: &str,
        listen: bool,
    ) -> Result<RawFilter, FilterError> {
        let topic = topic_for(chat_id);
        let min_pow = if listen { MIN_POW } else { MAX_POW };

        let private_key_id = self.add_key_pair(state)?;
        let filter_id = self.network.subscribe(SubscribeOptions {
            sym_key_id: None,
            private_key_id: Some(private_key_id),
            min_pow,
            topics: vec![topic],
        })?;

        debug!(
            "subscribed {} to {chat_id} on topic {topic}",
            self.public_key().fmt_short()
        );

        Ok(RawFilter {
            filter_id,
            topic,
            sym_key_id: None,
        })
    }
}

impl<N, S> std::fmt::Debug for FiltersManager<N, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiltersManager")
            .field("public_key", &self.private_key.public_key())
            .field(
                "generic_discovery_topic_enabled",
                &self.generic_discovery_topic_enabled,
            )
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("failed to access persisted keys: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl FilterError {
    fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }
}
