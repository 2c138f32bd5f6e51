// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmur_core::PrivateKey;
use murmur_store::KeysStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::TransportConfig;
use crate::filters::FiltersManager;
use crate::monitor::{MailRequestMonitor, RequestEventsHandler};
use crate::network::Network;
use crate::registry::RequestsRegistry;
use crate::service::{Inner, TransportError, TransportService};

pub struct Builder<N, S> {
    network: Arc<N>,
    store: S,
    private_key: PrivateKey,
    config: TransportConfig,
    handler: Arc<dyn RequestEventsHandler>,
}

impl<N, S> Builder<N, S>
where
    N: Network,
    S: KeysStore + Send + Sync + 'static,
{
    pub(crate) fn new(network: Arc<N>, store: S, private_key: PrivateKey) -> Self {
        Self {
            network,
            store,
            private_key,
            config: TransportConfig::default(),
            handler: Arc::new(()),
        }
    }

    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Callbacks informed about every finished mailserver request.
    pub fn handler(mut self, handler: Arc<dyn RequestEventsHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Loads the persisted filter keys and starts the background tasks.
    pub async fn build(self) -> Result<TransportService<N, S>, TransportError> {
        let filters = Arc::new(
            FiltersManager::new(
                self.network.clone(),
                self.store,
                self.private_key.clone(),
                self.config.generic_discovery_topic_enabled,
            )
            .await?,
        );

        let registry = Arc::new(RequestsRegistry::new(self.config.requests_delay));
        let monitor = MailRequestMonitor::new(registry.clone(), self.handler);
        let shutdown_token = CancellationToken::new();

        let mut tasks = vec![monitor.spawn(self.network.subscribe_envelope_events())];
        if !self.config.clean_filters_interval.is_zero() {
            tasks.push(tokio::task::spawn(clean_filters(
                filters.clone(),
                self.config.clean_filters_interval,
                shutdown_token.clone(),
            )));
        }

        Ok(TransportService {
            inner: Arc::new(Inner {
                network: self.network,
                filters,
                registry,
                monitor,
                config: self.config,
                private_key: self.private_key,
                shutdown_token,
                tasks: Mutex::new(tasks),
            }),
        })
    }
}

/// Periodically removes the filters which were only created to publish messages.
async fn clean_filters<N, S>(
    filters: Arc<FiltersManager<N, S>>,
    period: Duration,
    shutdown_token: CancellationToken,
) where
    N: Network,
    S: KeysStore + Send + Sync + 'static,
{
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_token.cancelled() => break,
            _ = interval.tick() => {
                if let Err(err) = filters.remove_no_listen_filters().await {
                    error!("removing filters without listeners failed: {err:?}");
                }
            }
        }
    }

    debug!("filter cleanup stopped");
}
